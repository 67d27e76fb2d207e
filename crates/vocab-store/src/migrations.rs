//! 数据库迁移模块
//!
//! 管理 SQLite 数据库的版本迁移，确保数据库结构与应用版本保持一致。
//!
//! ## 迁移策略
//! - 每个迁移在独立事务中执行
//! - 迁移记录存储在 schema_migrations 表中
//! - 重复打开数据库时已应用的迁移被跳过

use rusqlite::Connection;

use crate::{StorageError, StorageResult};

/// 当前数据库 schema 版本
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// 初始化 schema SQL (V1)
const INIT_SCHEMA: &str = include_str!("schema.sql");

/// 迁移记录
#[derive(Debug, Clone)]
pub struct Migration {
    /// 迁移版本号
    pub version: i32,
    /// 迁移名称/描述
    pub name: String,
    /// 迁移 SQL 语句
    pub sql: String,
}

impl Migration {
    /// 创建新的迁移
    pub fn new(version: i32, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// 获取所有迁移定义
///
/// 返回按版本号排序的迁移列表
pub fn get_migrations() -> Vec<Migration> {
    vec![
        // V1: 初始表结构 (八张表)
        Migration::new(1, "初始表结构", INIT_SCHEMA),
        // V2: 查询索引
        Migration::new(
            2,
            "添加查询索引",
            r#"
            -- 到期复习查询
            CREATE INDEX IF NOT EXISTS idx_stats_next_review
                ON word_statistics(next_review);

            -- 错题排序查询
            CREATE INDEX IF NOT EXISTS idx_wrong_note_count
                ON wrong_note(wrong_count, last_wrong_date);

            -- 会话历史回放
            CREATE INDEX IF NOT EXISTS idx_history_session
                ON learning_history(session_id);

            -- 考试明细查询
            CREATE INDEX IF NOT EXISTS idx_question_exam
                ON exam_questions(exam_id);

            -- 单词文本查找 (CSV 导入去重、编辑时排重)
            CREATE INDEX IF NOT EXISTS idx_words_text
                ON words(word_text);
            "#,
        ),
    ]
}

/// 确保迁移表存在
fn ensure_migrations_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| StorageError::Migration(format!("创建迁移表失败: {}", e)))?;

    Ok(())
}

/// 获取当前数据库版本
///
/// # Returns
/// * `i32` - 当前版本号，如果没有迁移记录则返回 0
pub fn get_current_version(conn: &Connection) -> i32 {
    if ensure_migrations_table(conn).is_err() {
        return 0;
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// 获取已应用的迁移版本列表
fn get_applied_versions(conn: &Connection) -> StorageResult<Vec<i32>> {
    ensure_migrations_table(conn)?;

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(versions)
}

/// 记录迁移已应用
fn record_migration(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64
        ],
    )?;

    Ok(())
}

/// 运行数据库迁移
///
/// 检查当前数据库版本并执行必要的迁移脚本。
/// 每个迁移在独立事务中执行，失败时自动回滚该迁移。
///
/// # Returns
/// * `Result<i32, StorageError>` - 成功返回最终版本号
pub fn run_migrations(conn: &Connection) -> Result<i32, StorageError> {
    ensure_migrations_table(conn)?;

    let applied_versions = get_applied_versions(conn)?;
    let mut final_version = get_current_version(conn);

    log::info!(
        "当前数据库版本: {}, 目标版本: {}",
        final_version,
        CURRENT_SCHEMA_VERSION
    );

    for migration in get_migrations() {
        // 跳过已应用的迁移
        if applied_versions.contains(&migration.version) {
            continue;
        }

        log::info!("运行迁移 v{}: {}", migration.version, migration.name);

        match execute_migration_in_transaction(conn, &migration) {
            Ok(()) => {
                final_version = migration.version;
                log::info!("迁移 v{} 完成", migration.version);
            }
            Err(e) => {
                log::error!("迁移 v{} 失败: {}", migration.version, e);
                return Err(e);
            }
        }
    }

    Ok(final_version)
}

/// 在事务中执行单个迁移
fn execute_migration_in_transaction(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    conn.execute("BEGIN IMMEDIATE", [])?;

    match conn.execute_batch(&migration.sql) {
        Ok(()) => {
            if let Err(e) = record_migration(conn, migration) {
                conn.execute("ROLLBACK", []).ok();
                return Err(e);
            }

            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            conn.execute("ROLLBACK", []).ok();
            Err(StorageError::Migration(format!(
                "迁移 v{} 执行失败: {}",
                migration.version, e
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = setup_conn();
        let version = run_migrations(&conn).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let tables = [
            "words",
            "learning_sessions",
            "learning_history",
            "word_statistics",
            "exam_history",
            "exam_questions",
            "wrong_note",
            "user_settings",
        ];
        for table in tables {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "table {} should exist", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = setup_conn();
        run_migrations(&conn).unwrap();
        let version = run_migrations(&conn).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(applied, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_current_version_starts_at_zero() {
        let conn = setup_conn();
        assert_eq!(get_current_version(&conn), 0);
    }
}
