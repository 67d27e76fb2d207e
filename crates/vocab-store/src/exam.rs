//! 考试记录与错题本归并
//!
//! 错题本归并器: 每个单词至多保留一条错题记录，指向最近一次
//! 答错的考试。考试答对不清除记录——清退只由熟练度驱动，
//! 单词达到最高熟练度时从错题本退场 (唯一删除路径)。
//!
//! 一场考试的落库是单个事务: 考试记录、逐题明细、统计更新与
//! 错题本维护要么全部生效要么全部回滚。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use vocab_srs::SrsConfig;

use crate::models::{format_datetime, ExamDraft, ExamQuestion, ExamRecord, WrongNote};
use crate::settings::SettingsRepository;
use crate::statistics::StatisticsRepository;
use crate::word::WordRepository;
use crate::{StorageError, StorageResult};

/// 考试与错题本数据库操作仓库
pub struct ExamRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ExamRepository {
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

    /// 落库一场判分完毕的考试，返回考试 ID
    ///
    /// 单个事务: exam_history + exam_questions + 统计更新 + 错题本。
    pub fn record_exam(&self, draft: &ExamDraft) -> StorageResult<i64> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let exam_id = Self::record_exam_internal(&tx, draft)?;
        tx.commit()?;

        log::info!("考试落库完成, exam_id={}", exam_id);
        Ok(exam_id)
    }

    /// 记录单题判分结果对错题本的影响
    ///
    /// 答对不做任何修改；答错时创建或累加错题记录，
    /// 并替换最近考试指针与答错时间。
    pub fn record_grading(
        &self,
        exam_id: i64,
        word_id: i64,
        is_correct: bool,
        graded_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::record_grading_internal(&conn, exam_id, word_id, is_correct, graded_at)
    }

    /// 熟练度清退: 达到最高熟练度的单词移出错题本
    pub fn reconcile_mastery(&self, word_id: i64, mastery_level: i32) -> StorageResult<()> {
        let conn = self.get_conn()?;
        let config = SettingsRepository::srs_config_internal(&conn)?;
        Self::reconcile_mastery_internal(&conn, word_id, mastery_level, &config)
    }

    /// 错题排行: 按累计答错数降序、最近答错时间降序，截断到 limit
    pub fn top_wrong(&self, limit: i64) -> StorageResult<Vec<(i64, i64)>> {
        let conn = self.get_conn()?;
        Self::top_wrong_internal(&conn, limit)
    }

    /// 获取单词的错题记录
    pub fn wrong_note_for(&self, word_id: i64) -> StorageResult<Option<WrongNote>> {
        let conn = self.get_conn()?;
        Self::wrong_note_for_internal(&conn, word_id)
    }

    /// 获取考试记录 (包含已删除行)
    pub fn get_exam(&self, exam_id: i64) -> StorageResult<Option<ExamRecord>> {
        let conn = self.get_conn()?;
        Self::get_exam_internal(&conn, exam_id)
    }

    /// 获取全部未删除考试 (按时间降序)
    pub fn list_exams(&self) -> StorageResult<Vec<ExamRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM exam_history WHERE is_deleted = 0 ORDER BY exam_date DESC")?;

        let exams = stmt
            .query_map([], |row| ExamRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(exams)
    }

    /// 获取考试的逐题明细
    pub fn questions_for(&self, exam_id: i64) -> StorageResult<Vec<ExamQuestion>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM exam_questions WHERE exam_id = ?1 ORDER BY question_id ASC",
        )?;

        let questions = stmt
            .query_map(params![exam_id], |row| ExamQuestion::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(questions)
    }

    /// 逻辑删除考试记录 (错题本指针保留)
    pub fn soft_delete_exam(&self, exam_id: i64) -> StorageResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE exam_history SET is_deleted = 1 WHERE exam_id = ?1 AND is_deleted = 0",
            params![exam_id],
        )?;

        if affected == 0 {
            return Err(StorageError::NotFound(format!("考试 {}", exam_id)));
        }
        Ok(())
    }

    // ============================================================
    // 内部实现方法（静态方法，接受 &Connection）
    // ============================================================

    /// 落库一场考试（内部实现，调用方负责事务）
    pub fn record_exam_internal(conn: &Connection, draft: &ExamDraft) -> StorageResult<i64> {
        if !(0.0..=100.0).contains(&draft.score) {
            return Err(StorageError::Validation(format!(
                "得分 {} 超出 0-100 范围",
                draft.score
            )));
        }
        if draft.questions.is_empty() {
            return Err(StorageError::Validation("考试至少包含一道题".to_string()));
        }
        if let Some(d) = draft.duration_sec {
            if d < 0 {
                return Err(StorageError::Validation("考试用时不能为负".to_string()));
            }
        }

        conn.execute(
            r#"
            INSERT INTO exam_history (
                exam_date, exam_type, total_questions, score, duration_sec, is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
            params![
                format_datetime(draft.exam_date),
                draft.exam_type,
                draft.questions.len() as i64,
                draft.score,
                draft.duration_sec,
            ],
        )?;
        let exam_id = conn.last_insert_rowid();

        let config = SettingsRepository::srs_config_internal(conn)?;

        for question in &draft.questions {
            // 统计引擎先行: 单词有效性与时间单调性校验失败时整场回滚
            let stats = StatisticsRepository::record_answer_internal(
                conn,
                question.word_id,
                question.is_correct,
                draft.exam_date,
                &config,
            )?;

            conn.execute(
                r#"
                INSERT INTO exam_questions (
                    exam_id, word_id, question_text, correct_answer, user_answer, is_correct
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    exam_id,
                    question.word_id,
                    question.question_text,
                    question.correct_answer,
                    question.user_answer,
                    question.is_correct as i64,
                ],
            )?;

            Self::update_wrong_note(conn, exam_id, question.word_id, question.is_correct, draft.exam_date)?;

            if stats.mastery_level >= config.max_mastery_level {
                Self::reconcile_mastery_internal(conn, question.word_id, stats.mastery_level, &config)?;
            }
        }

        Ok(exam_id)
    }

    /// 记录单题判分（内部实现）
    pub fn record_grading_internal(
        conn: &Connection,
        exam_id: i64,
        word_id: i64,
        is_correct: bool,
        graded_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        // 考试与单词都必须存在且未删除
        match Self::get_exam_internal(conn, exam_id)? {
            Some(exam) if !exam.is_deleted => {}
            _ => return Err(StorageError::NotFound(format!("考试 {}", exam_id))),
        }
        WordRepository::get_active_internal(conn, word_id)?;

        Self::update_wrong_note(conn, exam_id, word_id, is_correct, graded_at)
    }

    /// 错题本升级/插入 (答对时不做任何修改)
    fn update_wrong_note(
        conn: &Connection,
        exam_id: i64,
        word_id: i64,
        is_correct: bool,
        graded_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if is_correct {
            return Ok(());
        }

        // 每个单词至多一行: 冲突时累加并替换最近考试指针
        conn.execute(
            r#"
            INSERT INTO wrong_note (word_id, latest_exam_id, wrong_count, last_wrong_date)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(word_id) DO UPDATE SET
                wrong_count = wrong_count + 1,
                latest_exam_id = excluded.latest_exam_id,
                last_wrong_date = excluded.last_wrong_date
            "#,
            params![word_id, exam_id, format_datetime(graded_at)],
        )?;

        Ok(())
    }

    /// 熟练度清退（内部实现）
    ///
    /// 错题本行的唯一删除路径。
    pub fn reconcile_mastery_internal(
        conn: &Connection,
        word_id: i64,
        mastery_level: i32,
        config: &SrsConfig,
    ) -> StorageResult<()> {
        if mastery_level < config.max_mastery_level {
            return Ok(());
        }

        let removed = conn.execute("DELETE FROM wrong_note WHERE word_id = ?1", params![word_id])?;
        if removed > 0 {
            log::info!("单词 {} 达到最高熟练度，移出错题本", word_id);
        }

        Ok(())
    }

    /// 错题排行（内部实现）
    pub fn top_wrong_internal(conn: &Connection, limit: i64) -> StorageResult<Vec<(i64, i64)>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT n.word_id, n.wrong_count
            FROM wrong_note n
            INNER JOIN words w ON w.word_id = n.word_id
            WHERE w.is_deleted = 0
            ORDER BY n.wrong_count DESC, n.last_wrong_date DESC, n.word_id ASC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// 获取单词的错题记录（内部实现）
    pub fn wrong_note_for_internal(
        conn: &Connection,
        word_id: i64,
    ) -> StorageResult<Option<WrongNote>> {
        let note = conn
            .query_row(
                "SELECT * FROM wrong_note WHERE word_id = ?1",
                params![word_id],
                |row| WrongNote::from_row(row),
            )
            .optional()?;

        Ok(note)
    }

    /// 获取考试记录（内部实现）
    pub fn get_exam_internal(conn: &Connection, exam_id: i64) -> StorageResult<Option<ExamRecord>> {
        let exam = conn
            .query_row(
                "SELECT * FROM exam_history WHERE exam_id = ?1",
                params![exam_id],
                |row| ExamRecord::from_row(row),
            )
            .optional()?;

        Ok(exam)
    }
}

// ============================================================
// 借用版本的 Repository（用于事务内操作）
// ============================================================

/// 借用连接的考试操作仓库
pub struct ExamRepositoryRef<'a> {
    conn: &'a Connection,
}

impl<'a> ExamRepositoryRef<'a> {
    /// 创建新的 ExamRepositoryRef 实例
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn record_exam(&self, draft: &ExamDraft) -> StorageResult<i64> {
        ExamRepository::record_exam_internal(self.conn, draft)
    }

    pub fn record_grading(
        &self,
        exam_id: i64,
        word_id: i64,
        is_correct: bool,
        graded_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        ExamRepository::record_grading_internal(self.conn, exam_id, word_id, is_correct, graded_at)
    }

    pub fn wrong_note_for(&self, word_id: i64) -> StorageResult<Option<WrongNote>> {
        ExamRepository::wrong_note_for_internal(self.conn, word_id)
    }

    pub fn top_wrong(&self, limit: i64) -> StorageResult<Vec<(i64, i64)>> {
        ExamRepository::top_wrong_internal(self.conn, limit)
    }
}

// ============================================================
// 测试
// ============================================================
