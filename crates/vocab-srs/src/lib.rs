//! # vocab-srs - 间隔重复调度核心
//!
//! 本 crate 提供纯 Rust 实现的间隔重复 (Spaced Repetition) 策略:
//!
//! - **熟练度转移** - 答对 +1、答错 -2，始终限制在 [0, 5] 区间
//! - **复习间隔** - 基础间隔按熟练度指数翻倍，封顶避免无限漂移
//! - **下次复习时间** - 由答题时刻与当前熟练度直接推导
//!
//! ## 设计理念
//!
//! - **纯函数** - 不依赖存储层，配置显式传入，便于单元测试
//! - **可调参数** - 数值策略只是文档化的默认值，全部可由
//!   `user_settings` 表覆盖后装配成 [`SrsConfig`] 传入

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// 默认参数
// ============================================================================

/// 默认基础复习间隔 (天)，对应设置项 `review_interval_days`
pub const DEFAULT_BASE_INTERVAL_DAYS: i64 = 3;

/// 复习间隔上限 (天)
pub const DEFAULT_MAX_INTERVAL_DAYS: i64 = 90;

/// 最高熟练度等级
pub const MAX_MASTERY_LEVEL: i32 = 5;

/// 答对时的熟练度增量
pub const DEFAULT_CORRECT_STEP: i32 = 1;

/// 答错时的熟练度降幅 (遗忘曲线不对称: 退步快于进步)
pub const DEFAULT_WRONG_PENALTY: i32 = 2;

// ============================================================================
// SrsConfig - 调度参数
// ============================================================================

/// 间隔重复调度参数
///
/// 由调用方从用户设置装配后显式传入，每次操作读取一次，
/// 不作为全局可变状态存在。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrsConfig {
    /// 基础复习间隔 (天)
    pub base_interval_days: i64,
    /// 复习间隔上限 (天)
    pub max_interval_days: i64,
    /// 最高熟练度等级
    pub max_mastery_level: i32,
    /// 答对时的等级增量
    pub correct_step: i32,
    /// 答错时的等级降幅
    pub wrong_penalty: i32,
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            base_interval_days: DEFAULT_BASE_INTERVAL_DAYS,
            max_interval_days: DEFAULT_MAX_INTERVAL_DAYS,
            max_mastery_level: MAX_MASTERY_LEVEL,
            correct_step: DEFAULT_CORRECT_STEP,
            wrong_penalty: DEFAULT_WRONG_PENALTY,
        }
    }
}

impl SrsConfig {
    /// 以指定基础间隔创建配置，其余参数使用默认值
    pub fn with_base_interval(base_interval_days: i64) -> Self {
        Self {
            base_interval_days: base_interval_days.max(1),
            ..Self::default()
        }
    }
}

// ============================================================================
// MasteryUpdate - 一次答题产生的调度结果
// ============================================================================

/// 一次答题事件对应的调度结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryUpdate {
    /// 更新后的熟练度等级
    pub mastery_level: i32,
    /// 本次复习时间 (即答题时刻)
    pub last_review: DateTime<Utc>,
    /// 下次复习时间
    pub next_review: DateTime<Utc>,
}

// ============================================================================
// 核心函数
// ============================================================================

/// 计算答题后的新熟练度等级
///
/// 答对: `min(max_level, level + correct_step)`；
/// 答错: `max(0, level - wrong_penalty)`。
pub fn next_level(current: i32, is_correct: bool, config: &SrsConfig) -> i32 {
    if is_correct {
        (current + config.correct_step).min(config.max_mastery_level)
    } else {
        (current - config.wrong_penalty).max(0)
    }
}

/// 计算指定熟练度等级的复习间隔 (天)
///
/// 经典的间隔翻倍: `base * 2^level`，封顶 `max_interval_days`。
pub fn interval_days(level: i32, config: &SrsConfig) -> i64 {
    let level = level.clamp(0, config.max_mastery_level) as u32;
    config
        .base_interval_days
        .saturating_mul(1i64 << level)
        .min(config.max_interval_days)
}

/// 应用一次答题事件，返回新的熟练度与复习调度
///
/// 调用方负责事件因果顺序校验 (`answered_at` 不早于上次复习)，
/// 本函数只做纯计算。
pub fn apply_answer(
    current_level: i32,
    is_correct: bool,
    answered_at: DateTime<Utc>,
    config: &SrsConfig,
) -> MasteryUpdate {
    let mastery_level = next_level(current_level, is_correct, config);
    let next_review = answered_at + Duration::days(interval_days(mastery_level, config));

    MasteryUpdate {
        mastery_level,
        last_review: answered_at,
        next_review,
    }
}

// ============================================================================
// 测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn correct_answer_raises_level_by_one() {
        let cfg = SrsConfig::default();
        assert_eq!(next_level(0, true, &cfg), 1);
        assert_eq!(next_level(4, true, &cfg), 5);
    }

    #[test]
    fn level_is_capped_at_max() {
        let cfg = SrsConfig::default();
        assert_eq!(next_level(5, true, &cfg), 5);
    }

    #[test]
    fn wrong_answer_drops_two_levels() {
        let cfg = SrsConfig::default();
        assert_eq!(next_level(5, false, &cfg), 3);
        assert_eq!(next_level(2, false, &cfg), 0);
    }

    #[test]
    fn level_never_goes_negative() {
        let cfg = SrsConfig::default();
        assert_eq!(next_level(0, false, &cfg), 0);
        assert_eq!(next_level(1, false, &cfg), 0);
    }

    #[test]
    fn level_stays_in_bounds_for_any_sequence() {
        let cfg = SrsConfig::default();
        let mut level = 0;
        let answers = [true, false, true, true, false, false, true, true, true, true, true, false];
        for is_correct in answers {
            level = next_level(level, is_correct, &cfg);
            assert!((0..=cfg.max_mastery_level).contains(&level));
        }
    }

    #[test]
    fn interval_doubles_with_level() {
        let cfg = SrsConfig::default();
        assert_eq!(interval_days(0, &cfg), 3);
        assert_eq!(interval_days(1, &cfg), 6);
        assert_eq!(interval_days(2, &cfg), 12);
        assert_eq!(interval_days(3, &cfg), 24);
        assert_eq!(interval_days(4, &cfg), 48);
    }

    #[test]
    fn interval_is_capped() {
        let cfg = SrsConfig::default();
        // 3 * 2^5 = 96 > 90
        assert_eq!(interval_days(5, &cfg), 90);

        let wide = SrsConfig::with_base_interval(7);
        // 7 * 2^4 = 112 > 90
        assert_eq!(interval_days(4, &wide), 90);
    }

    #[test]
    fn apply_answer_schedules_from_answered_at() {
        let cfg = SrsConfig::default();
        let answered = at("2025-10-20 09:00:00");

        let update = apply_answer(0, true, answered, &cfg);
        assert_eq!(update.mastery_level, 1);
        assert_eq!(update.last_review, answered);
        assert_eq!(update.next_review, answered + Duration::days(6));
    }

    #[test]
    fn apply_wrong_answer_shortens_interval() {
        let cfg = SrsConfig::default();
        let answered = at("2025-10-20 09:00:00");

        let update = apply_answer(3, false, answered, &cfg);
        assert_eq!(update.mastery_level, 1);
        assert_eq!(update.next_review, answered + Duration::days(6));
    }

    #[test]
    fn five_straight_correct_reach_mastery() {
        let cfg = SrsConfig::default();
        let mut level = 0;
        let mut t = at("2025-10-20 09:00:00");
        for _ in 0..5 {
            let update = apply_answer(level, true, t, &cfg);
            level = update.mastery_level;
            t = update.next_review;
        }
        assert_eq!(level, 5);
    }
}
