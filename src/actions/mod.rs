//! 玩家动作插件
//!
//! 物品消耗动作能力的接口定义、物品模型以及随机源

pub mod item_upgrade;

pub use item_upgrade::*;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 物品消耗动作能力名称
pub const ITEM_CONSUME_ACTION: &str = "item-consume-action";

/// 物品定义标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u16);

/// 物品组标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemGroupId(pub u16);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

impl fmt::Display for ItemGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// 物品
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub definition: ItemId,
    pub group: ItemGroupId,
    pub level: u8,
    pub has_luck: bool,
}

impl Item {
    pub fn new(definition: ItemId, group: ItemGroupId, level: u8) -> Self {
        Self {
            definition,
            group,
            level,
            has_luck: false,
        }
    }

    pub fn with_luck(mut self) -> Self {
        self.has_luck = true;
        self
    }
}

/// 消耗结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// 物品不满足条件，未做任何修改
    Rejected(RejectReason),
    /// 已掷骰并写回物品等级
    Applied {
        previous_level: u8,
        outcome: AttemptOutcome,
    },
}

/// 物品消耗动作能力
///
/// 以 `Arc<dyn ItemConsumeAction>` 注册到 [`ITEM_CONSUME_ACTION`] 能力下。
pub trait ItemConsumeAction: Send + Sync {
    fn consume(&self, item: &mut Item, random: &mut dyn RandomSource) -> ConsumeOutcome;
}

/// 均匀随机源
pub trait RandomSource {
    /// 1..=100 的百分位掷骰
    fn roll_percentile(&mut self) -> u8;
}

/// 基于 `rand` 的随机源
pub struct RngRandomSource<R: Rng> {
    rng: R,
}

impl<R: Rng> RngRandomSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngRandomSource<rand::rngs::ThreadRng> {
    pub fn thread_local() -> Self {
        Self::new(rand::thread_rng())
    }
}

impl<R: Rng> RandomSource for RngRandomSource<R> {
    fn roll_percentile(&mut self) -> u8 {
        self.rng.gen_range(1..=100)
    }
}

/// 固定结果的随机源
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(u8);

impl FixedRandom {
    pub fn new(roll: u8) -> Self {
        Self(roll.clamp(1, 100))
    }
}

impl RandomSource for FixedRandom {
    fn roll_percentile(&mut self) -> u8 {
        self.0
    }
}
