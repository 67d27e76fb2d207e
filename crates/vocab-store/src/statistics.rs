//! 单词统计与间隔重复引擎
//!
//! 把每个答题事件翻译为 word_statistics 的一次更新:
//! 计数累加、熟练度转移与下次复习时间计算 (策略见 `vocab-srs`)。
//!
//! 本模块只负责统计行本身，不写学习历史 (会话仓库的职责)，
//! 也不触碰错题本 (考试仓库的职责)，保持独立可测。
//!
//! ## 时间单调性
//!
//! 事件必须按因果顺序到达: `answered_at` 早于已记录的
//! `last_review` (或单词创建时间) 的迟到事件会被拒绝而不是
//! 静默合并，以保证复习调度单调推进。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use vocab_srs::SrsConfig;

use crate::models::{format_datetime, WordStatistics};
use crate::word::WordRepository;
use crate::{StorageError, StorageResult};

/// 单词统计数据库操作仓库 (间隔重复引擎)
pub struct StatisticsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StatisticsRepository {
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

    /// 记录一次答题事件并返回更新后的统计行
    ///
    /// 统计行不存在时先以零值创建；除统计行变更外无其他副作用。
    pub fn record_answer(
        &self,
        word_id: i64,
        is_correct: bool,
        answered_at: DateTime<Utc>,
        config: &SrsConfig,
    ) -> StorageResult<WordStatistics> {
        let conn = self.get_conn()?;
        Self::record_answer_internal(&conn, word_id, is_correct, answered_at, config)
    }

    /// 获取单词的统计行
    pub fn get(&self, word_id: i64) -> StorageResult<Option<WordStatistics>> {
        let conn = self.get_conn()?;
        Self::get_internal(&conn, word_id)
    }

    /// 查询到期待复习的单词 ID
    ///
    /// 满足 `next_review <= as_of` 的全部未删除单词，按
    /// `next_review` 升序、累计错题数降序排列。每次调用重新计算，
    /// 不持有游标状态。
    pub fn due_for_review(&self, as_of: DateTime<Utc>) -> StorageResult<Vec<i64>> {
        let conn = self.get_conn()?;
        Self::due_for_review_internal(&conn, as_of)
    }

    /// 熟练度分布 (0..=max 每级的单词数，统计面板用)
    pub fn mastery_distribution(&self, config: &SrsConfig) -> StorageResult<Vec<(i32, i64)>> {
        let conn = self.get_conn()?;
        Self::mastery_distribution_internal(&conn, config)
    }

    // ============================================================
    // 内部实现方法（静态方法，接受 &Connection）
    // ============================================================

    /// 记录答题事件（内部实现）
    pub fn record_answer_internal(
        conn: &Connection,
        word_id: i64,
        is_correct: bool,
        answered_at: DateTime<Utc>,
        config: &SrsConfig,
    ) -> StorageResult<WordStatistics> {
        // 单词必须存在且未删除
        let word = WordRepository::get_active_internal(conn, word_id)?;

        if answered_at < word.created_date {
            return Err(StorageError::InvalidTimestamp(format!(
                "单词 {} 的答题时间 {} 早于创建时间 {}",
                word_id,
                format_datetime(answered_at),
                format_datetime(word.created_date)
            )));
        }

        let existing = Self::get_internal(conn, word_id)?;

        // 迟到事件直接拒绝，保证 last_review 单调不减
        if let Some(last) = existing.as_ref().and_then(|s| s.last_review) {
            if answered_at < last {
                return Err(StorageError::InvalidTimestamp(format!(
                    "单词 {} 的答题时间 {} 早于上次复习时间 {}",
                    word_id,
                    format_datetime(answered_at),
                    format_datetime(last)
                )));
            }
        }

        let current_level = existing.as_ref().map(|s| s.mastery_level).unwrap_or(0);
        let update = vocab_srs::apply_answer(current_level, is_correct, answered_at, config);

        match existing {
            Some(stats) => {
                conn.execute(
                    r#"
                    UPDATE word_statistics SET
                        total_attempts = total_attempts + 1,
                        correct_count = correct_count + ?2,
                        last_review = ?3,
                        next_review = ?4,
                        mastery_level = ?5
                    WHERE stats_id = ?1
                    "#,
                    params![
                        stats.stats_id,
                        is_correct as i64,
                        format_datetime(update.last_review),
                        format_datetime(update.next_review),
                        update.mastery_level,
                    ],
                )?;
            }
            None => {
                // 首次答题: 惰性创建统计行
                conn.execute(
                    r#"
                    INSERT INTO word_statistics (
                        word_id, total_attempts, correct_count,
                        last_review, next_review, mastery_level
                    ) VALUES (?1, 1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        word_id,
                        is_correct as i64,
                        format_datetime(update.last_review),
                        format_datetime(update.next_review),
                        update.mastery_level,
                    ],
                )?;
            }
        }

        Self::get_internal(conn, word_id)?
            .ok_or_else(|| StorageError::NotFound(format!("单词 {} 的统计行", word_id)))
    }

    /// 获取统计行（内部实现）
    pub fn get_internal(conn: &Connection, word_id: i64) -> StorageResult<Option<WordStatistics>> {
        let stats = conn
            .query_row(
                "SELECT * FROM word_statistics WHERE word_id = ?1",
                params![word_id],
                |row| WordStatistics::from_row(row),
            )
            .optional()?;

        Ok(stats)
    }

    /// 查询到期单词 ID（内部实现）
    pub fn due_for_review_internal(
        conn: &Connection,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Vec<i64>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT s.word_id
            FROM word_statistics s
            INNER JOIN words w ON w.word_id = s.word_id
            LEFT JOIN wrong_note n ON n.word_id = s.word_id
            WHERE w.is_deleted = 0
              AND s.next_review IS NOT NULL
              AND s.next_review <= ?1
            ORDER BY s.next_review ASC, COALESCE(n.wrong_count, 0) DESC, s.word_id ASC
            "#,
        )?;

        let ids = stmt
            .query_map(params![format_datetime(as_of)], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        Ok(ids)
    }

    /// 熟练度分布（内部实现）
    pub fn mastery_distribution_internal(
        conn: &Connection,
        config: &SrsConfig,
    ) -> StorageResult<Vec<(i32, i64)>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT s.mastery_level, COUNT(s.word_id)
            FROM word_statistics s
            INNER JOIN words w ON w.word_id = s.word_id
            WHERE w.is_deleted = 0
            GROUP BY s.mastery_level
            "#,
        )?;

        let counted: Vec<(i32, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        // 无数据的等级补零
        let distribution = (0..=config.max_mastery_level)
            .map(|level| {
                let count = counted
                    .iter()
                    .find(|(l, _)| *l == level)
                    .map(|(_, c)| *c)
                    .unwrap_or(0);
                (level, count)
            })
            .collect();

        Ok(distribution)
    }
}

// ============================================================
// 借用版本的 Repository（用于事务内操作）
// ============================================================

/// 借用连接的统计操作仓库
pub struct StatisticsRepositoryRef<'a> {
    conn: &'a Connection,
}

impl<'a> StatisticsRepositoryRef<'a> {
    /// 创建新的 StatisticsRepositoryRef 实例
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn record_answer(
        &self,
        word_id: i64,
        is_correct: bool,
        answered_at: DateTime<Utc>,
        config: &SrsConfig,
    ) -> StorageResult<WordStatistics> {
        StatisticsRepository::record_answer_internal(
            self.conn, word_id, is_correct, answered_at, config,
        )
    }

    pub fn get(&self, word_id: i64) -> StorageResult<Option<WordStatistics>> {
        StatisticsRepository::get_internal(self.conn, word_id)
    }

    pub fn due_for_review(&self, as_of: DateTime<Utc>) -> StorageResult<Vec<i64>> {
        StatisticsRepository::due_for_review_internal(self.conn, as_of)
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::models::WordDraft;
    use crate::settings::SettingsRepository;
    use crate::word::WordRepository;
    use chrono::{Duration, NaiveDateTime};

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        SettingsRepository::seed_defaults_internal(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn at(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn create_word(conn: &Arc<Mutex<Connection>>, text: &str) -> i64 {
        WordRepository::new(Arc::clone(conn))
            .create(&WordDraft::new(text, "뜻"))
            .unwrap()
    }

    #[test]
    fn test_first_answer_creates_stats_row() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let answered = Utc::now() + Duration::seconds(1);
        let stats = repo.record_answer(word_id, true, answered, &cfg).unwrap();

        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.correct_count, 1);
        assert_eq!(stats.mastery_level, 1);
        assert_eq!(
            stats.next_review.map(format_datetime),
            Some(format_datetime(answered + Duration::days(6)))
        );
    }

    #[test]
    fn test_wrong_answer_regresses_two_levels() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let mut t = Utc::now() + Duration::seconds(1);
        for _ in 0..3 {
            repo.record_answer(word_id, true, t, &cfg).unwrap();
            t += Duration::days(1);
        }
        let stats = repo.record_answer(word_id, false, t, &cfg).unwrap();

        assert_eq!(stats.mastery_level, 1);
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.correct_count, 3);
    }

    #[test]
    fn test_mastery_stays_in_bounds() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let mut t = Utc::now() + Duration::seconds(1);
        let answers = [false, false, true, true, true, true, true, true, true, false, false, false, false];
        for is_correct in answers {
            let stats = repo.record_answer(word_id, is_correct, t, &cfg).unwrap();
            assert!((0..=5).contains(&stats.mastery_level));
            t += Duration::hours(1);
        }
    }

    #[test]
    fn test_unknown_word_is_not_found() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(conn);
        let cfg = SrsConfig::default();

        let err = repo
            .record_answer(999, true, Utc::now(), &cfg)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_soft_deleted_word_is_not_found() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        WordRepository::new(Arc::clone(&conn))
            .soft_delete(word_id)
            .unwrap();

        let err = repo
            .record_answer(word_id, true, Utc::now() + Duration::seconds(1), &cfg)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_out_of_order_event_is_rejected() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let answered = Utc::now() + Duration::days(1);
        repo.record_answer(word_id, true, answered, &cfg).unwrap();

        // 早于 last_review 的迟到事件被拒绝，状态保持不变
        let err = repo
            .record_answer(word_id, true, answered - Duration::hours(1), &cfg)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTimestamp(_)));

        let stats = repo.get(word_id).unwrap().unwrap();
        assert_eq!(stats.total_attempts, 1);
    }

    #[test]
    fn test_answer_before_word_creation_is_rejected() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let err = repo
            .record_answer(word_id, true, at("2000-01-01 00:00:00"), &cfg)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_due_for_review_window() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let apple = create_word(&conn, "apple");
        let banana = create_word(&conn, "banana");

        let t0 = Utc::now() + Duration::seconds(1);
        // apple: 答错 -> level 0, 3 天后到期; banana: 答对 -> level 1, 6 天后到期
        repo.record_answer(apple, false, t0, &cfg).unwrap();
        repo.record_answer(banana, true, t0, &cfg).unwrap();

        assert!(repo.due_for_review(t0).unwrap().is_empty());

        let due = repo.due_for_review(t0 + Duration::days(4)).unwrap();
        assert_eq!(due, vec![apple]);

        let due = repo.due_for_review(t0 + Duration::days(7)).unwrap();
        assert_eq!(due, vec![apple, banana]);
    }

    #[test]
    fn test_fresh_correct_answer_removes_from_due_set() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let t0 = Utc::now() + Duration::seconds(1);
        repo.record_answer(word_id, false, t0, &cfg).unwrap();

        let as_of = t0 + Duration::days(4);
        assert_eq!(repo.due_for_review(as_of).unwrap(), vec![word_id]);

        // 到期后答对一次，next_review 被推进，同一 as_of 不再返回
        repo.record_answer(word_id, true, as_of, &cfg).unwrap();
        assert!(repo.due_for_review(as_of).unwrap().is_empty());
    }

    #[test]
    fn test_due_excludes_soft_deleted_words() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        let t0 = Utc::now() + Duration::seconds(1);
        repo.record_answer(word_id, false, t0, &cfg).unwrap();
        WordRepository::new(Arc::clone(&conn))
            .soft_delete(word_id)
            .unwrap();

        // 孤儿统计行保留但不再进入复习队列
        assert!(repo.get(word_id).unwrap().is_some());
        assert!(repo
            .due_for_review(t0 + Duration::days(30))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mastery_distribution_fills_missing_levels() {
        let conn = setup_test_db();
        let repo = StatisticsRepository::new(Arc::clone(&conn));
        let cfg = SrsConfig::default();
        let word_id = create_word(&conn, "apple");

        repo.record_answer(word_id, true, Utc::now() + Duration::seconds(1), &cfg)
            .unwrap();

        let dist = repo.mastery_distribution(&cfg).unwrap();
        assert_eq!(dist.len(), 6);
        assert_eq!(dist[1], (1, 1));
        assert_eq!(dist[0], (0, 0));
        assert_eq!(dist[5], (5, 0));
    }
}
