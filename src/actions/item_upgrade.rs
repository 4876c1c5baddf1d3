//! 物品等级提升动作
//!
//! 数据驱动的宝石升级规则：允许/禁止集合、成功率组合以及失败惩罚

use super::{ConsumeOutcome, Item, ItemConsumeAction, ItemGroupId, ItemId, RandomSource};
use crate::{RealmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 百分比上限
pub const MAX_PERCENTAGE: u8 = 100;

/// 默认的物品等级上限
pub const DEFAULT_LEVEL_CEILING: u8 = 15;

fn default_level_amount() -> u8 {
    1
}

fn default_level_ceiling() -> u8 {
    DEFAULT_LEVEL_CEILING
}

/// 物品等级提升配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRuleConfig {
    /// 基础成功率（百分比）
    pub success_rate_percentage: u8,
    /// 物品带幸运属性时追加的成功率（百分比）
    #[serde(default)]
    pub success_rate_bonus_with_luck_percentage: u8,
    /// 使用前物品的最低等级
    #[serde(default)]
    pub minimum_level: u8,
    /// 使用前物品的最高等级
    pub maximum_level: u8,
    /// 成功时提升的等级数
    #[serde(default = "default_level_amount")]
    pub level_amount: u8,
    /// 物品允许的最高等级，成功后的等级不会超过它
    #[serde(default = "default_level_ceiling")]
    pub level_ceiling: u8,
    /// 允许升级的物品，为空表示除禁止列表外全部允许
    #[serde(default)]
    pub allowed_items: BTreeSet<ItemId>,
    /// 禁止升级的物品
    #[serde(default)]
    pub disallowed_items: BTreeSet<ItemId>,
    /// 允许升级的物品组，为空表示除禁止列表外全部允许
    #[serde(default)]
    pub allowed_item_groups: BTreeSet<ItemGroupId>,
    /// 禁止升级的物品组
    #[serde(default)]
    pub disallowed_item_groups: BTreeSet<ItemGroupId>,
    /// 失败时超过此等级的物品归零，0 表示关闭惩罚
    #[serde(default)]
    pub reset_to_level0_when_fail_min_level: u8,
}

impl Default for UpgradeRuleConfig {
    fn default() -> Self {
        Self {
            success_rate_percentage: 0,
            success_rate_bonus_with_luck_percentage: 0,
            minimum_level: 0,
            maximum_level: 0,
            level_amount: default_level_amount(),
            level_ceiling: default_level_ceiling(),
            allowed_items: BTreeSet::new(),
            disallowed_items: BTreeSet::new(),
            allowed_item_groups: BTreeSet::new(),
            disallowed_item_groups: BTreeSet::new(),
            reset_to_level0_when_fail_min_level: 0,
        }
    }
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LevelBelowMinimum { level: u8, minimum: u8 },
    LevelAboveMaximum { level: u8, maximum: u8 },
    ItemDisallowed(ItemId),
    ItemNotAllowed(ItemId),
    GroupDisallowed(ItemGroupId),
    GroupNotAllowed(ItemGroupId),
}

/// 资格判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible(UpgradeAttempt),
    Rejected(RejectReason),
}

/// 尝试结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { new_level: u8 },
    Failure { new_level: u8 },
}

impl AttemptOutcome {
    pub fn new_level(&self) -> u8 {
        match self {
            Self::Success { new_level } | Self::Failure { new_level } => *new_level,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 已通过资格判定、尚未掷骰的升级尝试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeAttempt {
    /// 当前等级
    pub level: u8,
    /// 生效的成功率
    pub success_rate: u8,
    level_amount: u8,
    level_ceiling: u8,
    reset_threshold: u8,
}

impl UpgradeAttempt {
    /// 掷骰并计算结果等级
    ///
    /// 百分位掷骰落在 1..=100，掷骰值不大于成功率即成功。
    /// 成功后的等级封顶于物品等级上限。
    pub fn attempt(&self, random: &mut dyn RandomSource) -> AttemptOutcome {
        let roll = random.roll_percentile();
        if roll <= self.success_rate {
            AttemptOutcome::Success {
                new_level: self
                    .level
                    .saturating_add(self.level_amount)
                    .min(self.level_ceiling.max(self.level)),
            }
        } else if self.reset_threshold > 0 && self.level > self.reset_threshold {
            AttemptOutcome::Failure { new_level: 0 }
        } else {
            AttemptOutcome::Failure { new_level: self.level }
        }
    }
}

/// 允许/禁止集合判定：禁止优先，允许集合为空时放行全部
fn passes<T: Ord>(value: &T, allowed: &BTreeSet<T>, disallowed: &BTreeSet<T>) -> Admission {
    if disallowed.contains(value) {
        Admission::Denied
    } else if !allowed.is_empty() && !allowed.contains(value) {
        Admission::NotAllowed
    } else {
        Admission::Admitted
    }
}

enum Admission {
    Admitted,
    Denied,
    NotAllowed,
}

impl UpgradeRuleConfig {
    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.success_rate_percentage > MAX_PERCENTAGE
            || self.success_rate_bonus_with_luck_percentage > MAX_PERCENTAGE
        {
            return Err(RealmError::config("Success rates must be between 0 and 100"));
        }

        if self.minimum_level > self.maximum_level {
            return Err(RealmError::config("Minimum level must not exceed maximum level"));
        }

        if self.level_amount == 0 {
            return Err(RealmError::config("Level amount must be positive"));
        }

        if self.maximum_level > self.level_ceiling {
            return Err(RealmError::config("Maximum level must not exceed the level ceiling"));
        }

        Ok(())
    }

    /// 生效的成功率
    pub fn effective_success_rate(&self, has_luck: bool) -> u8 {
        let bonus = if has_luck {
            self.success_rate_bonus_with_luck_percentage as u16
        } else {
            0
        };
        (self.success_rate_percentage as u16 + bonus).min(MAX_PERCENTAGE as u16) as u8
    }

    /// 物品是否通过允许/禁止判定
    pub fn is_item_admitted(&self, item: ItemId) -> bool {
        matches!(passes(&item, &self.allowed_items, &self.disallowed_items), Admission::Admitted)
    }

    /// 物品组是否通过允许/禁止判定
    pub fn is_group_admitted(&self, group: ItemGroupId) -> bool {
        matches!(
            passes(&group, &self.allowed_item_groups, &self.disallowed_item_groups),
            Admission::Admitted
        )
    }

    /// 资格判定
    pub fn evaluate(&self, item: ItemId, group: ItemGroupId, level: u8, has_luck: bool) -> Eligibility {
        if level < self.minimum_level {
            return Eligibility::Rejected(RejectReason::LevelBelowMinimum {
                level,
                minimum: self.minimum_level,
            });
        }
        if level > self.maximum_level {
            return Eligibility::Rejected(RejectReason::LevelAboveMaximum {
                level,
                maximum: self.maximum_level,
            });
        }

        match passes(&item, &self.allowed_items, &self.disallowed_items) {
            Admission::Denied => return Eligibility::Rejected(RejectReason::ItemDisallowed(item)),
            Admission::NotAllowed => return Eligibility::Rejected(RejectReason::ItemNotAllowed(item)),
            Admission::Admitted => {}
        }

        match passes(&group, &self.allowed_item_groups, &self.disallowed_item_groups) {
            Admission::Denied => return Eligibility::Rejected(RejectReason::GroupDisallowed(group)),
            Admission::NotAllowed => return Eligibility::Rejected(RejectReason::GroupNotAllowed(group)),
            Admission::Admitted => {}
        }

        Eligibility::Eligible(UpgradeAttempt {
            level,
            success_rate: self.effective_success_rate(has_luck),
            level_amount: self.level_amount,
            level_ceiling: self.level_ceiling,
            reset_threshold: self.reset_to_level0_when_fail_min_level,
        })
    }
}

/// 基于 [`UpgradeRuleConfig`] 的物品消耗动作
#[derive(Debug, Clone)]
pub struct UpgradeItemLevelAction {
    config: UpgradeRuleConfig,
}

impl UpgradeItemLevelAction {
    pub fn new(config: UpgradeRuleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &UpgradeRuleConfig {
        &self.config
    }
}

impl ItemConsumeAction for UpgradeItemLevelAction {
    fn consume(&self, item: &mut Item, random: &mut dyn RandomSource) -> ConsumeOutcome {
        match self.config.evaluate(item.definition, item.group, item.level, item.has_luck) {
            Eligibility::Rejected(reason) => ConsumeOutcome::Rejected(reason),
            Eligibility::Eligible(attempt) => {
                let previous_level = item.level;
                let outcome = attempt.attempt(random);
                item.level = outcome.new_level();
                ConsumeOutcome::Applied { previous_level, outcome }
            }
        }
    }
}
