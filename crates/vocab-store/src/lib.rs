//! # vocab-store - 智能单词本本地存储
//!
//! 基于 SQLite 的单机词汇学习持久层，提供:
//!
//! - 单词、学习会话、逐题历史的 CRUD (单词支持逻辑删除)
//! - 间隔重复核心: 答题事件驱动的单词统计与复习调度
//! - 错题本归并: 每个单词至多一条最近错题记录
//! - 复习选词: 到期单词与错题单词的有序查询
//! - 用户设置: 带类型标记的键值对与首次初始化种子数据
//!
//! ## 并发与原子性
//!
//! 单用户单写者模型。连接由 `Arc<Mutex<Connection>>` 共享，
//! 所有跨表写入路径都在同一事务内完成，会话中断不会留下
//! "历史已写入而统计未更新" 的半成品状态。

// ============================================================
// 子模块声明
// ============================================================

pub mod exam;
pub mod migrations;
pub mod models;
pub mod review;
pub mod session;
pub mod settings;
pub mod statistics;
pub mod word;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use exam::{ExamRepository, ExamRepositoryRef};
pub use migrations::run_migrations;
pub use models::*;
pub use review::{ReviewSelector, ReviewSelectorRef};
pub use session::{SessionRepository, SessionRepositoryRef};
pub use settings::{SettingsRepository, SettingsRepositoryRef, SEED_SETTINGS};
pub use statistics::{StatisticsRepository, StatisticsRepositoryRef};
pub use word::{WordRepository, WordRepositoryRef};

pub use vocab_srs::{MasteryUpdate, SrsConfig};

// ============================================================
// 依赖导入
// ============================================================

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储模块错误类型
///
/// 业务错误 (`NotFound` / `InvalidTimestamp` / `ConstraintViolation` /
/// `Validation`) 均可由调用方恢复: 被拒绝的操作不产生任何部分修改。
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("迁移错误: {0}")]
    Migration(String),

    #[error("数据未找到: {0}")]
    NotFound(String),

    #[error("事件时间早于已有记录: {0}")]
    InvalidTimestamp(String),

    #[error("唯一性冲突: {0}")]
    ConstraintViolation(String),

    #[error("数据校验失败: {0}")]
    Validation(String),

    #[error("锁获取失败: {0}")]
    LockError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// 将 SQLite 唯一约束错误映射为 `ConstraintViolation`
pub(crate) fn map_unique_violation(e: rusqlite::Error, what: &str) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(what.to_string())
        }
        _ => StorageError::Database(e),
    }
}

// ============================================================
// Storage - 统一存储结构体
// ============================================================

/// 统一存储结构体
///
/// 打开数据库时自动启用 WAL 与外键约束、运行迁移，
/// 并以插入即忽略的方式补齐默认设置种子数据。
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Storage {
    /// 打开 (或创建) 数据库文件
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        let connection = Connection::open(&db_path)?;

        // 启用 WAL 模式以提高并发性能
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-64000;",
        )?;

        Self::from_connection(connection, path_str)
    }

    /// 创建内存数据库（用于测试）
    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;

        connection.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-64000;",
        )?;

        Self::from_connection(connection, ":memory:".to_string())
    }

    fn from_connection(connection: Connection, db_path: String) -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(connection));

        {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::LockError(e.to_string()))?;
            migrations::run_migrations(&guard)?;
            // 种子设置为插入即忽略语义，已有键永不覆盖
            settings::SettingsRepository::seed_defaults_internal(&guard)?;
        }

        Ok(Self { conn, db_path })
    }

    /// 获取数据库连接
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库路径
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// 获取单词仓库
    pub fn words(&self) -> WordRepository {
        WordRepository::new(Arc::clone(&self.conn))
    }

    /// 获取学习会话仓库
    pub fn sessions(&self) -> SessionRepository {
        SessionRepository::new(Arc::clone(&self.conn))
    }

    /// 获取单词统计仓库 (间隔重复引擎)
    pub fn statistics(&self) -> StatisticsRepository {
        StatisticsRepository::new(Arc::clone(&self.conn))
    }

    /// 获取考试与错题本仓库
    pub fn exams(&self) -> ExamRepository {
        ExamRepository::new(Arc::clone(&self.conn))
    }

    /// 获取用户设置仓库
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(Arc::clone(&self.conn))
    }

    /// 获取复习选词器
    pub fn review(&self) -> ReviewSelector {
        ReviewSelector::new(Arc::clone(&self.conn))
    }

    /// 执行事务
    pub fn transaction<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))?;

        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_in_memory() {
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");
        assert_eq!(storage.db_path(), ":memory:");
    }

    #[test]
    fn test_storage_transaction() {
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");

        let result = storage.transaction(|_conn| Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_open_seeds_default_settings() {
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");

        let count: i64 = {
            let conn = storage.connection();
            let guard = conn.lock().unwrap();
            guard
                .query_row("SELECT COUNT(*) FROM user_settings", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(count, 5);
    }

    #[test]
    fn test_reopen_keeps_settings_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vocab.db");

        {
            let storage = Storage::new(&db_path).expect("Failed to open db");
            storage
                .settings()
                .set("theme_mode", "dark")
                .expect("Failed to set theme");
        }

        // 重新打开: 迁移与种子数据均为幂等，已有值不被覆盖
        let storage = Storage::new(&db_path).expect("Failed to reopen db");
        let theme = storage.settings().get_string("theme_mode").unwrap();
        assert_eq!(theme, "dark");

        let count: i64 = {
            let conn = storage.connection();
            let guard = conn.lock().unwrap();
            guard
                .query_row("SELECT COUNT(*) FROM user_settings", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(count, 5);
    }
}
