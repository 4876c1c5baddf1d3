//! RealmHost 核心数据类型
//!
//! 客户端版本、语言以及能力解析上下文

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 纳秒时间戳
pub type TimestampNs = i64;
/// 插件标识
pub type PlugInId = String;
/// 能力（扩展点）名称
pub type CapabilityName = String;

/// 当前时间戳（纳秒）
pub fn now_ns() -> TimestampNs {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// 客户端语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClientLanguage {
    /// 与语言无关，可匹配任何客户端
    Invariant,
    English,
    Japanese,
    Korean,
    Chinese,
    Taiwanese,
    Thai,
    Vietnamese,
    Philippine,
}

impl Default for ClientLanguage {
    fn default() -> Self {
        Self::Invariant
    }
}

impl fmt::Display for ClientLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 客户端版本：版本三元组 + 语言
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientVersion {
    pub version: Version,
    #[serde(default)]
    pub language: ClientLanguage,
}

impl ClientVersion {
    pub fn new(major: u64, minor: u64, patch: u64, language: ClientLanguage) -> Self {
        Self {
            version: Version::new(major, minor, patch),
            language,
        }
    }

    /// 任意语言的版本
    pub fn invariant(major: u64, minor: u64, patch: u64) -> Self {
        Self::new(major, minor, patch, ClientLanguage::Invariant)
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.language)
    }
}

/// 插件的最低客户端要求
///
/// 版本按语义化版本顺序比较（主版本、次版本、修订号依次比较）。
/// 语言为 [`ClientLanguage::Invariant`] 时匹配任何客户端语言，否则必须完全相同。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinimumClient(pub ClientVersion);

impl MinimumClient {
    pub fn new(major: u64, minor: u64, patch: u64, language: ClientLanguage) -> Self {
        Self(ClientVersion::new(major, minor, patch, language))
    }

    /// 对所有客户端开放
    pub fn any() -> Self {
        Self::new(0, 0, 0, ClientLanguage::Invariant)
    }

    pub fn version(&self) -> &Version {
        &self.0.version
    }

    pub fn language(&self) -> ClientLanguage {
        self.0.language
    }

    /// 客户端是否满足要求
    pub fn is_satisfied_by(&self, client: &ClientVersion) -> bool {
        let language_matches =
            self.0.language == ClientLanguage::Invariant || self.0.language == client.language;
        language_matches && self.0.version <= client.version
    }
}

impl Default for MinimumClient {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for MinimumClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">= {}", self.0)
    }
}

/// 能力解析上下文 - 调用方提供的客户端事实
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
    /// 客户端版本
    pub client: ClientVersion,
    /// 启用的特性开关
    pub features: BTreeSet<String>,
}

impl ResolutionContext {
    pub fn new(client: ClientVersion) -> Self {
        Self {
            client,
            features: BTreeSet::new(),
        }
    }

    /// 添加特性开关
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}
