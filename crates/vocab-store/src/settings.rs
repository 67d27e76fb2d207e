//! 用户设置数据库操作
//!
//! 提供 user_settings 表的类型化读写与首次初始化种子数据。
//! 设置不是全局可变状态: 调用方在每次操作前读取一次，
//! 装配成配置对象显式传入核心逻辑。

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use vocab_srs::SrsConfig;

use crate::models::{format_datetime, Setting};
use crate::{StorageError, StorageResult};

// ============================================================
// 种子数据
// ============================================================

/// 首次初始化写入的默认设置 (key, value, type, description)
///
/// 插入即忽略语义: 已存在的键永远不会被覆盖。
/// 同时作为键缺失时的回退默认值。
pub const SEED_SETTINGS: [(&str, &str, &str, &str); 5] = [
    ("theme_mode", "light", "string", "UI 主题 (light / dark)"),
    ("default_quiz_count", "10", "integer", "默认出题数量"),
    ("review_interval_days", "3", "integer", "基础复习间隔 (天)"),
    ("max_memo_length", "200", "integer", "单词备注最大长度"),
    ("language_pair", "en-ko", "string", "学习语言对 (en-ko / ko-en)"),
];

/// 查找键对应的种子默认值
fn seed_default(key: &str) -> Option<&'static str> {
    SEED_SETTINGS
        .iter()
        .find(|(k, _, _, _)| *k == key)
        .map(|(_, v, _, _)| *v)
}

// ============================================================
// SettingsRepository - 用户设置仓储
// ============================================================

/// 用户设置数据库操作仓库
pub struct SettingsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsRepository {
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

    /// 获取单条设置记录
    pub fn get(&self, key: &str) -> StorageResult<Option<Setting>> {
        let conn = self.get_conn()?;
        Self::get_internal(&conn, key)
    }

    /// 获取字符串设置值，键缺失时回退到种子默认值
    pub fn get_string(&self, key: &str) -> StorageResult<String> {
        let conn = self.get_conn()?;
        Self::get_string_internal(&conn, key)
    }

    /// 获取整数设置值，键缺失时回退到种子默认值
    pub fn get_i64(&self, key: &str) -> StorageResult<i64> {
        let conn = self.get_conn()?;
        Self::get_i64_internal(&conn, key)
    }

    /// 写入设置值 (插入或更新，刷新修改时间)
    pub fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::set_internal(&conn, key, value, "string")
    }

    /// 写入整数设置值
    pub fn set_i64(&self, key: &str, value: i64) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::set_internal(&conn, key, &value.to_string(), "integer")
    }

    /// 获取全部设置记录
    pub fn all(&self) -> StorageResult<Vec<Setting>> {
        let conn = self.get_conn()?;
        Self::all_internal(&conn)
    }

    /// 补齐缺失的种子设置 (幂等)
    pub fn seed_defaults(&self) -> StorageResult<()> {
        let conn = self.get_conn()?;
        Self::seed_defaults_internal(&conn)
    }

    /// 从设置装配间隔重复调度参数
    ///
    /// 每次操作调用一次，而不是缓存在内存中，
    /// 使设置修改对后续操作立即生效。
    pub fn srs_config(&self) -> StorageResult<SrsConfig> {
        let conn = self.get_conn()?;
        Self::srs_config_internal(&conn)
    }

    /// 默认出题数量
    pub fn default_quiz_count(&self) -> StorageResult<i64> {
        self.get_i64("default_quiz_count")
    }

    /// 单词备注最大长度
    pub fn max_memo_length(&self) -> StorageResult<i64> {
        self.get_i64("max_memo_length")
    }

    // ============================================================
    // 内部实现方法（静态方法，接受 &Connection）
    // ============================================================

    /// 获取单条设置记录（内部实现）
    pub fn get_internal(conn: &Connection, key: &str) -> StorageResult<Option<Setting>> {
        let setting = conn
            .query_row(
                "SELECT setting_key, setting_value, setting_type, description, modified_date
                 FROM user_settings WHERE setting_key = ?1",
                params![key],
                |row| Setting::from_row(row),
            )
            .optional()?;

        Ok(setting)
    }

    /// 获取字符串设置值（内部实现）
    pub fn get_string_internal(conn: &Connection, key: &str) -> StorageResult<String> {
        if let Some(setting) = Self::get_internal(conn, key)? {
            return Ok(setting.setting_value);
        }

        match seed_default(key) {
            Some(value) => {
                log::warn!("设置项 {} 缺失，使用默认值 {}", key, value);
                Ok(value.to_string())
            }
            None => Err(StorageError::NotFound(format!("设置项 {}", key))),
        }
    }

    /// 获取整数设置值（内部实现）
    pub fn get_i64_internal(conn: &Connection, key: &str) -> StorageResult<i64> {
        let raw = Self::get_string_internal(conn, key)?;
        raw.trim()
            .parse::<i64>()
            .map_err(|_| StorageError::Validation(format!("设置项 {} 的值 {:?} 不是整数", key, raw)))
    }

    /// 写入设置值（内部实现）
    ///
    /// 新键使用传入的类型标记，已有键保留原类型标记。
    pub fn set_internal(
        conn: &Connection,
        key: &str,
        value: &str,
        setting_type: &str,
    ) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO user_settings (setting_key, setting_value, setting_type, modified_date)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(setting_key) DO UPDATE SET
                setting_value = excluded.setting_value,
                modified_date = excluded.modified_date
            "#,
            params![key, value, setting_type, format_datetime(Utc::now())],
        )?;

        Ok(())
    }

    /// 获取全部设置记录（内部实现）
    pub fn all_internal(conn: &Connection) -> StorageResult<Vec<Setting>> {
        let mut stmt = conn.prepare(
            "SELECT setting_key, setting_value, setting_type, description, modified_date
             FROM user_settings ORDER BY setting_key",
        )?;

        let settings = stmt
            .query_map([], |row| Setting::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(settings)
    }

    /// 补齐缺失的种子设置（内部实现）
    pub fn seed_defaults_internal(conn: &Connection) -> StorageResult<()> {
        let now = format_datetime(Utc::now());

        for (key, value, setting_type, description) in SEED_SETTINGS {
            conn.execute(
                "INSERT OR IGNORE INTO user_settings
                     (setting_key, setting_value, setting_type, description, modified_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, value, setting_type, description, now],
            )?;
        }

        Ok(())
    }

    /// 从设置装配调度参数（内部实现）
    pub fn srs_config_internal(conn: &Connection) -> StorageResult<SrsConfig> {
        let base = Self::get_i64_internal(conn, "review_interval_days")?;
        Ok(SrsConfig::with_base_interval(base))
    }
}

// ============================================================
// 借用版本的 Repository（用于事务内操作）
// ============================================================

/// 借用连接的设置操作仓库
pub struct SettingsRepositoryRef<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsRepositoryRef<'a> {
    /// 创建新的 SettingsRepositoryRef 实例
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<Setting>> {
        SettingsRepository::get_internal(self.conn, key)
    }

    pub fn get_string(&self, key: &str) -> StorageResult<String> {
        SettingsRepository::get_string_internal(self.conn, key)
    }

    pub fn get_i64(&self, key: &str) -> StorageResult<i64> {
        SettingsRepository::get_i64_internal(self.conn, key)
    }

    pub fn srs_config(&self) -> StorageResult<SrsConfig> {
        SettingsRepository::srs_config_internal(self.conn)
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_seed_defaults_inserts_five_rows() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));

        repo.seed_defaults().unwrap();
        assert_eq!(repo.all().unwrap().len(), 5);
    }

    #[test]
    fn test_seed_defaults_never_overwrites() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));

        repo.seed_defaults().unwrap();
        repo.set("theme_mode", "dark").unwrap();

        // 再次播种: 行数不变，已有值保留
        repo.seed_defaults().unwrap();
        let all = repo.all().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(repo.get_string("theme_mode").unwrap(), "dark");
    }

    #[test]
    fn test_typed_getters() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));
        repo.seed_defaults().unwrap();

        assert_eq!(repo.get_i64("default_quiz_count").unwrap(), 10);
        assert_eq!(repo.get_i64("review_interval_days").unwrap(), 3);
        assert_eq!(repo.max_memo_length().unwrap(), 200);
        assert_eq!(repo.get_string("language_pair").unwrap(), "en-ko");
    }

    #[test]
    fn test_missing_key_falls_back_to_seed_default() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));

        // 未播种也能读到文档化的默认值
        assert_eq!(repo.get_i64("review_interval_days").unwrap(), 3);
        assert_eq!(repo.get_string("theme_mode").unwrap(), "light");
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));

        let err = repo.get_string("no_such_key").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_non_integer_value_is_rejected() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));
        repo.seed_defaults().unwrap();

        repo.set("default_quiz_count", "lots").unwrap();
        let err = repo.get_i64("default_quiz_count").unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn test_srs_config_reads_base_interval() {
        let conn = setup_test_db();
        let repo = SettingsRepository::new(Arc::clone(&conn));
        repo.seed_defaults().unwrap();

        let cfg = repo.srs_config().unwrap();
        assert_eq!(cfg.base_interval_days, 3);

        repo.set_i64("review_interval_days", 7).unwrap();
        let cfg = repo.srs_config().unwrap();
        assert_eq!(cfg.base_interval_days, 7);
    }
}
