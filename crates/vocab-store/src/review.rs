//! 复习选词
//!
//! 两条复习入口: 到期复习 (next_review 已过的单词) 与错题强化
//! (错题本里答错最多的单词)。两者都是即时查询，不维护队列状态，
//! 调用之间的数据变化在下一次查询自然生效。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::models::Word;
use crate::{StorageError, StorageResult};

/// 复习选词器
pub struct ReviewSelector {
    conn: Arc<Mutex<Connection>>,
}

impl ReviewSelector {
    /// 创建新的选词器实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取连接锁
    fn get_conn(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 到期待复习的单词
    ///
    /// 满足 `next_review <= as_of` 的未删除单词，最紧迫的在前:
    /// 按 next_review 升序，同刻按累计错题数降序。
    pub fn due_words(&self, as_of: DateTime<Utc>, limit: i64) -> StorageResult<Vec<Word>> {
        let conn = self.get_conn()?;
        Self::due_words_internal(&conn, as_of, limit)
    }

    /// 错题强化候选 (答错最多的在前)
    pub fn remedial_words(&self, limit: i64) -> StorageResult<Vec<Word>> {
        let conn = self.get_conn()?;
        Self::remedial_words_internal(&conn, limit)
    }

    // ============================================================
    // 内部实现方法（静态方法，接受 &Connection）
    // ============================================================

    /// 到期待复习的单词（内部实现）
    pub fn due_words_internal(
        conn: &Connection,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> StorageResult<Vec<Word>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT w.*
            FROM word_statistics s
            INNER JOIN words w ON w.word_id = s.word_id
            LEFT JOIN wrong_note n ON n.word_id = s.word_id
            WHERE w.is_deleted = 0
              AND s.next_review IS NOT NULL
              AND s.next_review <= ?1
            ORDER BY s.next_review ASC, COALESCE(n.wrong_count, 0) DESC, s.word_id ASC
            LIMIT ?2
            "#,
        )?;

        let words = stmt
            .query_map(
                params![crate::models::format_datetime(as_of), limit],
                |row| Word::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(words)
    }

    /// 错题强化候选（内部实现）
    ///
    /// 排序与错题排行一致: 错题数降序，同计数按最近答错时间降序。
    pub fn remedial_words_internal(conn: &Connection, limit: i64) -> StorageResult<Vec<Word>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT w.*
            FROM wrong_note n
            INNER JOIN words w ON w.word_id = n.word_id
            WHERE w.is_deleted = 0
            ORDER BY n.wrong_count DESC, n.last_wrong_date DESC, n.word_id ASC
            LIMIT ?1
            "#,
        )?;

        let words = stmt
            .query_map(params![limit], |row| Word::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(words)
    }
}

// ============================================================
// 借用版本（用于事务内操作）
// ============================================================

/// 借用连接的复习选词器
pub struct ReviewSelectorRef<'a> {
    conn: &'a Connection,
}

impl<'a> ReviewSelectorRef<'a> {
    /// 创建新的 ReviewSelectorRef 实例
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn due_words(&self, as_of: DateTime<Utc>, limit: i64) -> StorageResult<Vec<Word>> {
        ReviewSelector::due_words_internal(self.conn, as_of, limit)
    }

    pub fn remedial_words(&self, limit: i64) -> StorageResult<Vec<Word>> {
        ReviewSelector::remedial_words_internal(self.conn, limit)
    }
}

// ============================================================
// 测试
// ============================================================
