//! 单词数据库操作
//!
//! 提供单词条目的 CRUD、检索与收藏管理。
//! 删除默认为逻辑删除 (is_deleted=1)，所有面向学习的查询
//! 都显式过滤已删除行；`word_text` 的唯一约束覆盖已删除行。

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::models::{format_datetime, Word, WordDraft};
use crate::settings::SettingsRepository;
use crate::{map_unique_violation, StorageError, StorageResult};

/// 未分类单词的默认分类标签
pub const DEFAULT_CATEGORY: &str = "미분류";

/// 检索字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    /// 仅匹配单词原文
    WordText,
    /// 仅匹配释义
    Meaning,
    /// 同时匹配两者
    All,
}

/// 单词数据库操作仓库
pub struct WordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WordRepository {
    /// 创建新的仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取连接锁
    fn get_conn(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 新建单词，返回自增 ID
    pub fn create(&self, draft: &WordDraft) -> StorageResult<i64> {
        let conn = self.get_conn()?;
        Self::create_internal(&conn, draft)
    }

    /// 根据 ID 获取单词 (包含已删除行)
    pub fn get(&self, word_id: i64) -> StorageResult<Option<Word>> {
        let conn = self.get_conn()?;
        Self::get_internal(&conn, word_id)
    }

    /// 根据 ID 获取未删除的单词，缺失或已删除时返回 `NotFound`
    pub fn get_active(&self, word_id: i64) -> StorageResult<Word> {
        let conn = self.get_conn()?;
        Self::get_active_internal(&conn, word_id)
    }

    /// 获取全部未删除单词 (按创建时间升序)
    pub fn list_active(&self) -> StorageResult<Vec<Word>> {
        let conn = self.get_conn()?;
        Self::list_active_internal(&conn)
    }

    /// 按分类获取未删除单词
    pub fn list_by_category(&self, category: &str) -> StorageResult<Vec<Word>> {
        let conn = self.get_conn()?;
        Self::list_by_category_internal(&conn, category)
    }

    /// 获取收藏的未删除单词
    pub fn list_favorites(&self) -> StorageResult<Vec<Word>> {
        let conn = self.get_conn()?;
        Self::list_favorites_internal(&conn)
    }

    /// 按关键字检索未删除单词
    pub fn search(&self, keyword: &str, field: SearchField) -> StorageResult<Vec<Word>> {
        let conn = self.get_conn()?;
        Self::search_internal(&conn, keyword, field)
    }

    /// 更新单词内容，刷新修改时间
    pub fn update(&self, word: &Word) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::update_internal(&conn, word)
    }

    /// 切换收藏状态
    pub fn toggle_favorite(&self, word_id: i64, is_favorite: bool) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::toggle_favorite_internal(&conn, word_id, is_favorite)
    }

    /// 逻辑删除
    pub fn soft_delete(&self, word_id: i64) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::soft_delete_internal(&conn, word_id)
    }

    /// 物理删除 (一般情况下应使用逻辑删除)
    pub fn hard_delete(&self, word_id: i64) -> StorageResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM words WHERE word_id = ?1", params![word_id])?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("单词 {}", word_id)));
        }
        Ok(())
    }

    /// 按原文获取未删除单词 (CSV 导入去重、编辑排重用)
    pub fn get_by_text(&self, word_text: &str) -> StorageResult<Option<Word>> {
        let conn = self.get_conn()?;
        Self::get_by_text_internal(&conn, word_text)
    }

    /// 检查原文是否已存在，`exclude_id` 用于编辑时排除自身
    pub fn exists_by_text(&self, word_text: &str, exclude_id: Option<i64>) -> StorageResult<bool> {
        let conn = self.get_conn()?;
        Self::exists_by_text_internal(&conn, word_text, exclude_id)
    }

    /// 未删除单词总数
    pub fn count_active(&self) -> StorageResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM words WHERE is_deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ============================================================
    // 内部实现方法（静态方法，接受 &Connection）
    // ============================================================

    /// 校验草稿内容，备注长度上限从设置读取
    fn validate_draft(
        conn: &Connection,
        word_text: &str,
        meaning_ko: &str,
        memo: Option<&str>,
    ) -> StorageResult<()> {
        if word_text.trim().is_empty() {
            return Err(StorageError::Validation("单词原文不能为空".to_string()));
        }
        if meaning_ko.trim().is_empty() {
            return Err(StorageError::Validation("单词释义不能为空".to_string()));
        }

        if let Some(memo) = memo {
            let max_len = SettingsRepository::get_i64_internal(conn, "max_memo_length")?;
            if memo.chars().count() as i64 > max_len {
                return Err(StorageError::Validation(format!(
                    "备注超过最大长度 {}",
                    max_len
                )));
            }
        }

        Ok(())
    }

    /// 新建单词（内部实现）
    pub fn create_internal(conn: &Connection, draft: &WordDraft) -> StorageResult<i64> {
        Self::validate_draft(
            conn,
            &draft.word_text,
            &draft.meaning_ko,
            draft.memo.as_deref(),
        )?;

        let now = format_datetime(Utc::now());
        let category = draft.category.as_deref().unwrap_or(DEFAULT_CATEGORY);

        conn.execute(
            r#"
            INSERT INTO words (
                word_text, meaning_ko, category, memo, is_favorite,
                created_date, modified_date, is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
            "#,
            params![
                draft.word_text.trim(),
                draft.meaning_ko.trim(),
                category,
                draft.memo,
                draft.is_favorite as i64,
                now,
                now,
            ],
        )
        .map_err(|e| map_unique_violation(e, &format!("单词 {:?} 已存在", draft.word_text)))?;

        Ok(conn.last_insert_rowid())
    }

    /// 根据 ID 获取单词（内部实现）
    pub fn get_internal(conn: &Connection, word_id: i64) -> StorageResult<Option<Word>> {
        let word = conn
            .query_row(
                "SELECT * FROM words WHERE word_id = ?1",
                params![word_id],
                |row| Word::from_row(row),
            )
            .optional()?;

        Ok(word)
    }

    /// 根据 ID 获取未删除单词（内部实现）
    pub fn get_active_internal(conn: &Connection, word_id: i64) -> StorageResult<Word> {
        match Self::get_internal(conn, word_id)? {
            Some(word) if !word.is_deleted => Ok(word),
            _ => Err(StorageError::NotFound(format!("单词 {}", word_id))),
        }
    }

    /// 获取全部未删除单词（内部实现）
    pub fn list_active_internal(conn: &Connection) -> StorageResult<Vec<Word>> {
        let mut stmt =
            conn.prepare("SELECT * FROM words WHERE is_deleted = 0 ORDER BY created_date ASC")?;

        let words = stmt
            .query_map([], |row| Word::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(words)
    }

    /// 按分类获取未删除单词（内部实现）
    pub fn list_by_category_internal(conn: &Connection, category: &str) -> StorageResult<Vec<Word>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM words WHERE is_deleted = 0 AND category = ?1
             ORDER BY created_date ASC",
        )?;

        let words = stmt
            .query_map(params![category], |row| Word::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(words)
    }

    /// 获取收藏单词（内部实现）
    pub fn list_favorites_internal(conn: &Connection) -> StorageResult<Vec<Word>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM words WHERE is_deleted = 0 AND is_favorite = 1
             ORDER BY created_date ASC",
        )?;

        let words = stmt
            .query_map([], |row| Word::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(words)
    }

    /// 按关键字检索（内部实现）
    pub fn search_internal(
        conn: &Connection,
        keyword: &str,
        field: SearchField,
    ) -> StorageResult<Vec<Word>> {
        let pattern = format!("%{}%", keyword);

        let sql = match field {
            SearchField::WordText => {
                "SELECT * FROM words WHERE is_deleted = 0 AND word_text LIKE ?1
                 ORDER BY word_text ASC"
            }
            SearchField::Meaning => {
                "SELECT * FROM words WHERE is_deleted = 0 AND meaning_ko LIKE ?1
                 ORDER BY word_text ASC"
            }
            SearchField::All => {
                "SELECT * FROM words
                 WHERE is_deleted = 0 AND (word_text LIKE ?1 OR meaning_ko LIKE ?1)
                 ORDER BY word_text ASC"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let words = stmt
            .query_map(params![pattern], |row| Word::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(words)
    }

    /// 更新单词（内部实现）
    pub fn update_internal(conn: &Connection, word: &Word) -> StorageResult<()> {
        Self::validate_draft(conn, &word.word_text, &word.meaning_ko, word.memo.as_deref())?;

        let affected = conn
            .execute(
                r#"
                UPDATE words SET
                    word_text = ?2, meaning_ko = ?3, category = ?4,
                    memo = ?5, is_favorite = ?6, modified_date = ?7
                WHERE word_id = ?1 AND is_deleted = 0
                "#,
                params![
                    word.word_id,
                    word.word_text.trim(),
                    word.meaning_ko.trim(),
                    word.category,
                    word.memo,
                    word.is_favorite as i64,
                    format_datetime(Utc::now()),
                ],
            )
            .map_err(|e| map_unique_violation(e, &format!("单词 {:?} 已存在", word.word_text)))?;

        if affected == 0 {
            return Err(StorageError::NotFound(format!("单词 {}", word.word_id)));
        }

        Ok(())
    }

    /// 切换收藏状态（内部实现）
    pub fn toggle_favorite_internal(
        conn: &Connection,
        word_id: i64,
        is_favorite: bool,
    ) -> StorageResult<()> {
        let affected = conn.execute(
            "UPDATE words SET is_favorite = ?2, modified_date = ?3
             WHERE word_id = ?1 AND is_deleted = 0",
            params![word_id, is_favorite as i64, format_datetime(Utc::now())],
        )?;

        if affected == 0 {
            return Err(StorageError::NotFound(format!("单词 {}", word_id)));
        }

        Ok(())
    }

    /// 逻辑删除（内部实现）
    pub fn soft_delete_internal(conn: &Connection, word_id: i64) -> StorageResult<()> {
        let affected = conn.execute(
            "UPDATE words SET is_deleted = 1, modified_date = ?2
             WHERE word_id = ?1 AND is_deleted = 0",
            params![word_id, format_datetime(Utc::now())],
        )?;

        if affected == 0 {
            return Err(StorageError::NotFound(format!("单词 {}", word_id)));
        }

        Ok(())
    }

    /// 按原文获取未删除单词（内部实现）
    pub fn get_by_text_internal(conn: &Connection, word_text: &str) -> StorageResult<Option<Word>> {
        let word = conn
            .query_row(
                "SELECT * FROM words WHERE word_text = ?1 AND is_deleted = 0",
                params![word_text],
                |row| Word::from_row(row),
            )
            .optional()?;

        Ok(word)
    }

    /// 检查原文是否已存在（内部实现）
    pub fn exists_by_text_internal(
        conn: &Connection,
        word_text: &str,
        exclude_id: Option<i64>,
    ) -> StorageResult<bool> {
        let exists: bool = match exclude_id {
            Some(id) => conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM words WHERE word_text = ?1 AND word_id != ?2)",
                params![word_text, id],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM words WHERE word_text = ?1)",
                params![word_text],
                |row| row.get(0),
            )?,
        };

        Ok(exists)
    }
}

// ============================================================
// 借用版本的 Repository（用于事务内操作）
// ============================================================

/// 借用连接的单词操作仓库
pub struct WordRepositoryRef<'a> {
    conn: &'a Connection,
}

impl<'a> WordRepositoryRef<'a> {
    /// 创建新的 WordRepositoryRef 实例
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, draft: &WordDraft) -> StorageResult<i64> {
        WordRepository::create_internal(self.conn, draft)
    }

    pub fn get(&self, word_id: i64) -> StorageResult<Option<Word>> {
        WordRepository::get_internal(self.conn, word_id)
    }

    pub fn get_active(&self, word_id: i64) -> StorageResult<Word> {
        WordRepository::get_active_internal(self.conn, word_id)
    }

    pub fn list_active(&self) -> StorageResult<Vec<Word>> {
        WordRepository::list_active_internal(self.conn)
    }

    pub fn soft_delete(&self, word_id: i64) -> StorageResult<()> {
        WordRepository::soft_delete_internal(self.conn, word_id)
    }
}

// ============================================================
// 测试
// ============================================================
