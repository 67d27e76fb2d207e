//! 数据模型定义
//!
//! 定义八张表对应的数据结构以及行解析方法。
//! 时间戳在库内使用 `DateTime<Utc>`，落库时格式化为
//! `YYYY-MM-DD HH:MM:SS` 文本，布尔标记落库为 0/1 整数。

use chrono::{DateTime, Utc};
use rusqlite::{Result as SqliteResult, Row};
use serde::{Deserialize, Serialize};

// ============================================================
// Word - 单词
// ============================================================

/// 单词条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    /// 单词 ID (自增主键)
    pub word_id: i64,
    /// 单词原文 (全表唯一，含已删除行)
    pub word_text: String,
    /// 韩文释义
    pub meaning_ko: String,
    /// 分类标签
    pub category: String,
    /// 备注 (长度受设置项 max_memo_length 约束)
    pub memo: Option<String>,
    /// 是否收藏
    pub is_favorite: bool,
    /// 创建时间
    pub created_date: DateTime<Utc>,
    /// 修改时间
    pub modified_date: DateTime<Utc>,
    /// 逻辑删除标记
    pub is_deleted: bool,
}

impl Word {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            word_id: row.get("word_id")?,
            word_text: row.get("word_text")?,
            meaning_ko: row.get("meaning_ko")?,
            category: row.get("category")?,
            memo: row.get("memo")?,
            is_favorite: row.get::<_, i64>("is_favorite")? != 0,
            created_date: parse_datetime(row.get::<_, String>("created_date")?),
            modified_date: parse_datetime(row.get::<_, String>("modified_date")?),
            is_deleted: row.get::<_, i64>("is_deleted")? != 0,
        })
    }
}

/// 新建单词的输入数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordDraft {
    /// 单词原文
    pub word_text: String,
    /// 韩文释义
    pub meaning_ko: String,
    /// 分类标签 (缺省为 "미분류")
    pub category: Option<String>,
    /// 备注
    pub memo: Option<String>,
    /// 是否收藏
    pub is_favorite: bool,
}

impl WordDraft {
    /// 创建仅含必填字段的草稿
    pub fn new(word_text: impl Into<String>, meaning_ko: impl Into<String>) -> Self {
        Self {
            word_text: word_text.into(),
            meaning_ko: meaning_ko.into(),
            category: None,
            memo: None,
            is_favorite: false,
        }
    }
}

// ============================================================
// LearningSession - 学习会话
// ============================================================

/// 学习会话
///
/// 创建时 `end_time` 为空且 `is_completed=0`；
/// 结束后为终态，不再接受新的历史记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSession {
    /// 会话 ID
    pub session_id: i64,
    /// 会话类型 (memorization / exam)
    pub session_type: String,
    /// 出题模式 (random / error-rate-weighted / sequential)
    pub session_mode: String,
    /// 开始时间
    pub start_time: DateTime<Utc>,
    /// 结束时间
    pub end_time: Option<DateTime<Utc>>,
    /// 计划学习单词数
    pub total_words: i64,
    /// 累计答对数
    pub correct_count: i64,
    /// 累计答错数
    pub wrong_count: i64,
    /// 是否已完成
    pub is_completed: bool,
}

impl LearningSession {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            session_id: row.get("session_id")?,
            session_type: row.get("session_type")?,
            session_mode: row.get("session_mode")?,
            start_time: parse_datetime(row.get::<_, String>("start_time")?),
            end_time: row
                .get::<_, Option<String>>("end_time")?
                .map(parse_datetime),
            total_words: row.get("total_words")?,
            correct_count: row.get("correct_count")?,
            wrong_count: row.get("wrong_count")?,
            is_completed: row.get::<_, i64>("is_completed")? != 0,
        })
    }
}

// ============================================================
// LearningHistoryEntry - 逐题学习历史
// ============================================================

/// 单题学习历史，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningHistoryEntry {
    /// 历史 ID
    pub history_id: i64,
    /// 所属会话 ID
    pub session_id: i64,
    /// 单词 ID
    pub word_id: i64,
    /// 是否答对
    pub is_correct: bool,
    /// 作答耗时 (秒，非负)
    pub response_time: Option<f64>,
    /// 作答时间
    pub learning_date: DateTime<Utc>,
}

impl LearningHistoryEntry {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            history_id: row.get("history_id")?,
            session_id: row.get("session_id")?,
            word_id: row.get("word_id")?,
            is_correct: row.get::<_, i64>("is_correct")? != 0,
            response_time: row.get("response_time")?,
            learning_date: parse_datetime(row.get::<_, String>("learning_date")?),
        })
    }
}

// ============================================================
// WordStatistics - 单词统计
// ============================================================

/// 单词统计 (每个单词至多一行，首次答题时惰性创建)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordStatistics {
    /// 统计 ID
    pub stats_id: i64,
    /// 单词 ID (唯一)
    pub word_id: i64,
    /// 累计答题次数
    pub total_attempts: i64,
    /// 累计答对次数
    pub correct_count: i64,
    /// 上次复习时间
    pub last_review: Option<DateTime<Utc>>,
    /// 下次复习时间
    pub next_review: Option<DateTime<Utc>>,
    /// 熟练度等级 (0-5)
    pub mastery_level: i32,
}

impl WordStatistics {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            stats_id: row.get("stats_id")?,
            word_id: row.get("word_id")?,
            total_attempts: row.get("total_attempts")?,
            correct_count: row.get("correct_count")?,
            last_review: row
                .get::<_, Option<String>>("last_review")?
                .map(parse_datetime),
            next_review: row
                .get::<_, Option<String>>("next_review")?
                .map(parse_datetime),
            mastery_level: row.get("mastery_level")?,
        })
    }

    /// 累计正确率 (0.0 - 1.0)
    pub fn accuracy(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.correct_count as f64 / self.total_attempts as f64
        }
    }
}

// ============================================================
// ExamRecord / ExamQuestion - 考试
// ============================================================

/// 考试记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamRecord {
    /// 考试 ID
    pub exam_id: i64,
    /// 考试时间
    pub exam_date: DateTime<Utc>,
    /// 考试类型
    pub exam_type: String,
    /// 题目数量
    pub total_questions: i64,
    /// 得分 (0-100)
    pub score: f64,
    /// 用时 (秒)
    pub duration_sec: Option<i64>,
    /// 逻辑删除标记
    pub is_deleted: bool,
}

impl ExamRecord {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            exam_id: row.get("exam_id")?,
            exam_date: parse_datetime(row.get::<_, String>("exam_date")?),
            exam_type: row.get("exam_type")?,
            total_questions: row.get("total_questions")?,
            score: row.get("score")?,
            duration_sec: row.get("duration_sec")?,
            is_deleted: row.get::<_, i64>("is_deleted")? != 0,
        })
    }
}

/// 考试题目明细，判分后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamQuestion {
    /// 题目 ID
    pub question_id: i64,
    /// 所属考试 ID
    pub exam_id: i64,
    /// 单词 ID
    pub word_id: i64,
    /// 题面文本
    pub question_text: String,
    /// 正确答案
    pub correct_answer: String,
    /// 用户作答 (未作答为空)
    pub user_answer: Option<String>,
    /// 是否答对
    pub is_correct: bool,
}

impl ExamQuestion {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            question_id: row.get("question_id")?,
            exam_id: row.get("exam_id")?,
            word_id: row.get("word_id")?,
            question_text: row.get("question_text")?,
            correct_answer: row.get("correct_answer")?,
            user_answer: row.get("user_answer")?,
            is_correct: row.get::<_, i64>("is_correct")? != 0,
        })
    }
}

/// 考试题目的输入数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamQuestionDraft {
    /// 单词 ID
    pub word_id: i64,
    /// 题面文本
    pub question_text: String,
    /// 正确答案
    pub correct_answer: String,
    /// 用户作答
    pub user_answer: Option<String>,
    /// 是否答对
    pub is_correct: bool,
}

/// 一场考试的完整输入 (记录 + 判分后的题目明细)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDraft {
    /// 考试类型
    pub exam_type: String,
    /// 考试时间
    pub exam_date: DateTime<Utc>,
    /// 得分 (0-100)
    pub score: f64,
    /// 用时 (秒)
    pub duration_sec: Option<i64>,
    /// 题目明细
    pub questions: Vec<ExamQuestionDraft>,
}

// ============================================================
// WrongNote - 错题本
// ============================================================

/// 错题记录 (每个单词至多一行)
///
/// 首次答错时创建，之后每次答错累加并替换最近考试指针；
/// 唯一删除路径是熟练度达到最高级时的清退。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrongNote {
    /// 记录 ID
    pub note_id: i64,
    /// 单词 ID (唯一)
    pub word_id: i64,
    /// 最近一次答错所在的考试 ID
    pub latest_exam_id: i64,
    /// 累计答错次数
    pub wrong_count: i64,
    /// 最近一次答错时间
    pub last_wrong_date: DateTime<Utc>,
}

impl WrongNote {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            note_id: row.get("note_id")?,
            word_id: row.get("word_id")?,
            latest_exam_id: row.get("latest_exam_id")?,
            wrong_count: row.get("wrong_count")?,
            last_wrong_date: parse_datetime(row.get::<_, String>("last_wrong_date")?),
        })
    }
}

// ============================================================
// Setting - 用户设置
// ============================================================

/// 用户设置键值对
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    /// 设置键 (主键)
    pub setting_key: String,
    /// 字符串编码的设置值
    pub setting_value: String,
    /// 值类型标记 (string / integer)
    pub setting_type: String,
    /// 描述
    pub description: Option<String>,
    /// 修改时间
    pub modified_date: DateTime<Utc>,
}

impl Setting {
    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            setting_key: row.get("setting_key")?,
            setting_value: row.get("setting_value")?,
            setting_type: row.get("setting_type")?,
            description: row.get("description")?,
            modified_date: parse_datetime(row.get::<_, String>("modified_date")?),
        })
    }
}

// ============================================================
// 日期时间辅助函数
// ============================================================

/// 解析数据库中的日期时间字符串
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return dt.with_timezone(&Utc);
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return DateTime::from_naive_utc_and_offset(dt, Utc);
    }

    Utc::now()
}

/// 格式化日期时间为字符串
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_roundtrip() {
        let s = "2025-10-20 12:34:56".to_string();
        let dt = parse_datetime(s.clone());
        assert_eq!(format_datetime(dt), s);
    }

    #[test]
    fn test_word_draft_defaults() {
        let draft = WordDraft::new("apple", "사과");
        assert_eq!(draft.word_text, "apple");
        assert!(draft.category.is_none());
        assert!(!draft.is_favorite);
    }

    #[test]
    fn test_statistics_accuracy() {
        let stats = WordStatistics {
            stats_id: 1,
            word_id: 1,
            total_attempts: 4,
            correct_count: 3,
            last_review: None,
            next_review: None,
            mastery_level: 2,
        };
        assert!((stats.accuracy() - 0.75).abs() < f64::EPSILON);
    }
}
