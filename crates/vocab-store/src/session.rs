//! 学习会话与逐题历史
//!
//! 会话记录器: 开启/结束学习会话，并把每次作答写入只追加的
//! learning_history 表。一次作答对应一个事务，覆盖历史追加、
//! 会话计数与统计更新——中断不会留下半成品状态。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::exam::ExamRepository;
use crate::models::{format_datetime, LearningHistoryEntry, LearningSession, WordStatistics};
use crate::settings::SettingsRepository;
use crate::statistics::StatisticsRepository;
use crate::{StorageError, StorageResult};

// ============================================================
// DailyRate - 日正答率
// ============================================================

/// 某一天的正答率汇总 (统计图表用)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRate {
    /// 日期 (YYYY-MM-DD)
    pub date: String,
    /// 正答率 (0-100)
    pub correct_rate: f64,
    /// 当天答题总数
    pub total_attempts: i64,
}

// ============================================================
// SessionRepository - 学习会话仓储
// ============================================================

/// 学习会话数据库操作仓库
pub struct SessionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SessionRepository {
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

    /// 开启新会话，返回自增 ID
    pub fn start(
        &self,
        session_type: &str,
        session_mode: &str,
        total_words: i64,
    ) -> StorageResult<i64> {
        let conn = self.get_conn()?;
        Self::start_internal(&conn, session_type, session_mode, total_words)
    }

    /// 记录一次作答
    ///
    /// 单个事务内完成: 历史追加、会话计数、统计更新，以及
    /// 熟练度达到最高级时的错题本清退。任一校验失败则整体回滚。
    pub fn record_answer(
        &self,
        session_id: i64,
        word_id: i64,
        is_correct: bool,
        response_time: Option<f64>,
        answered_at: DateTime<Utc>,
    ) -> StorageResult<WordStatistics> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let stats = Self::record_answer_internal(
            &tx,
            session_id,
            word_id,
            is_correct,
            response_time,
            answered_at,
        )?;
        tx.commit()?;
        Ok(stats)
    }

    /// 结束会话 (写入结束时间并标记完成，此后为终态)
    pub fn finish(&self, session_id: i64) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::finish_internal(&conn, session_id)
    }

    /// 获取会话
    pub fn get(&self, session_id: i64) -> StorageResult<Option<LearningSession>> {
        let conn = self.get_conn()?;
        Self::get_internal(&conn, session_id)
    }

    /// 获取会话内的全部作答历史 (按时间顺序)
    pub fn history_for(&self, session_id: i64) -> StorageResult<Vec<LearningHistoryEntry>> {
        let conn = self.get_conn()?;
        Self::history_for_internal(&conn, session_id)
    }

    /// 最近 `days` 天的日正答率
    pub fn daily_correct_rate(&self, days: i64) -> StorageResult<Vec<DailyRate>> {
        let conn = self.get_conn()?;
        Self::daily_correct_rate_internal(&conn, days)
    }

    // ============================================================
    // 内部实现方法（静态方法，接受 &Connection）
    // ============================================================

    /// 开启新会话（内部实现）
    pub fn start_internal(
        conn: &Connection,
        session_type: &str,
        session_mode: &str,
        total_words: i64,
    ) -> StorageResult<i64> {
        if total_words < 0 {
            return Err(StorageError::Validation("计划单词数不能为负".to_string()));
        }

        conn.execute(
            r#"
            INSERT INTO learning_sessions (
                session_type, session_mode, start_time,
                total_words, correct_count, wrong_count, is_completed
            ) VALUES (?1, ?2, ?3, ?4, 0, 0, 0)
            "#,
            params![
                session_type,
                session_mode,
                format_datetime(Utc::now()),
                total_words,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// 记录一次作答（内部实现，调用方负责事务）
    pub fn record_answer_internal(
        conn: &Connection,
        session_id: i64,
        word_id: i64,
        is_correct: bool,
        response_time: Option<f64>,
        answered_at: DateTime<Utc>,
    ) -> StorageResult<WordStatistics> {
        let session = Self::get_internal(conn, session_id)?
            .ok_or_else(|| StorageError::NotFound(format!("会话 {}", session_id)))?;

        if session.is_completed {
            return Err(StorageError::Validation(format!(
                "会话 {} 已结束，不能再追加历史",
                session_id
            )));
        }

        if let Some(rt) = response_time {
            if rt < 0.0 {
                return Err(StorageError::Validation("作答耗时不能为负".to_string()));
            }
        }

        // 先走统计引擎: 单词有效性与时间单调性在这里校验，
        // 拒绝时历史行尚未写入
        let config = SettingsRepository::srs_config_internal(conn)?;
        let stats = StatisticsRepository::record_answer_internal(
            conn,
            word_id,
            is_correct,
            answered_at,
            &config,
        )?;

        conn.execute(
            r#"
            INSERT INTO learning_history (
                session_id, word_id, is_correct, response_time, learning_date
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                session_id,
                word_id,
                is_correct as i64,
                response_time,
                format_datetime(answered_at),
            ],
        )?;

        if is_correct {
            conn.execute(
                "UPDATE learning_sessions SET correct_count = correct_count + 1
                 WHERE session_id = ?1",
                params![session_id],
            )?;
        } else {
            conn.execute(
                "UPDATE learning_sessions SET wrong_count = wrong_count + 1
                 WHERE session_id = ?1",
                params![session_id],
            )?;
        }

        // 达到最高熟练度的单词从错题本清退
        if stats.mastery_level >= config.max_mastery_level {
            ExamRepository::reconcile_mastery_internal(conn, word_id, stats.mastery_level, &config)?;
        }

        Ok(stats)
    }

    /// 结束会话（内部实现）
    pub fn finish_internal(conn: &Connection, session_id: i64) -> StorageResult<()> {
        let session = Self::get_internal(conn, session_id)?
            .ok_or_else(|| StorageError::NotFound(format!("会话 {}", session_id)))?;

        if session.is_completed {
            return Err(StorageError::Validation(format!(
                "会话 {} 已结束",
                session_id
            )));
        }

        conn.execute(
            "UPDATE learning_sessions SET end_time = ?2, is_completed = 1
             WHERE session_id = ?1",
            params![session_id, format_datetime(Utc::now())],
        )?;

        Ok(())
    }

    /// 获取会话（内部实现）
    pub fn get_internal(
        conn: &Connection,
        session_id: i64,
    ) -> StorageResult<Option<LearningSession>> {
        let session = conn
            .query_row(
                "SELECT * FROM learning_sessions WHERE session_id = ?1",
                params![session_id],
                |row| LearningSession::from_row(row),
            )
            .optional()?;

        Ok(session)
    }

    /// 获取会话历史（内部实现）
    pub fn history_for_internal(
        conn: &Connection,
        session_id: i64,
    ) -> StorageResult<Vec<LearningHistoryEntry>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM learning_history WHERE session_id = ?1
             ORDER BY learning_date ASC, history_id ASC",
        )?;

        let entries = stmt
            .query_map(params![session_id], |row| {
                LearningHistoryEntry::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// 日正答率（内部实现）
    pub fn daily_correct_rate_internal(
        conn: &Connection,
        days: i64,
    ) -> StorageResult<Vec<DailyRate>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                STRFTIME('%Y-%m-%d', learning_date) AS learning_day,
                SUM(is_correct) AS correct_total,
                COUNT(history_id) AS attempt_total
            FROM learning_history
            WHERE learning_date >= STRFTIME('%Y-%m-%d 00:00:00', DATE('now', ?1))
            GROUP BY learning_day
            ORDER BY learning_day ASC
            "#,
        )?;

        let offset = format!("-{} days", days.max(0));
        let rates = stmt
            .query_map(params![offset], |row| {
                let date: String = row.get("learning_day")?;
                let correct: i64 = row.get("correct_total")?;
                let total: i64 = row.get("attempt_total")?;
                let rate = if total > 0 {
                    correct as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                Ok(DailyRate {
                    date,
                    correct_rate: rate,
                    total_attempts: total,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rates)
    }
}

// ============================================================
// 借用版本的 Repository（用于事务内操作）
// ============================================================

/// 借用连接的会话操作仓库
pub struct SessionRepositoryRef<'a> {
    conn: &'a Connection,
}

impl<'a> SessionRepositoryRef<'a> {
    /// 创建新的 SessionRepositoryRef 实例
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn start(
        &self,
        session_type: &str,
        session_mode: &str,
        total_words: i64,
    ) -> StorageResult<i64> {
        SessionRepository::start_internal(self.conn, session_type, session_mode, total_words)
    }

    pub fn record_answer(
        &self,
        session_id: i64,
        word_id: i64,
        is_correct: bool,
        response_time: Option<f64>,
        answered_at: DateTime<Utc>,
    ) -> StorageResult<WordStatistics> {
        SessionRepository::record_answer_internal(
            self.conn,
            session_id,
            word_id,
            is_correct,
            response_time,
            answered_at,
        )
    }

    pub fn finish(&self, session_id: i64) -> StorageResult<()> {
        SessionRepository::finish_internal(self.conn, session_id)
    }

    pub fn get(&self, session_id: i64) -> StorageResult<Option<LearningSession>> {
        SessionRepository::get_internal(self.conn, session_id)
    }
}

// ============================================================
// 测试
// ============================================================
