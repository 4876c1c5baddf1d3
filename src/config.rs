//! RealmHost 配置管理系统
//!
//! 支持YAML/TOML配置文件驱动的宿主启动：监听组、插件覆盖项以及物品升级规则

use crate::actions::{ItemGroupId, UpgradeRuleConfig, ITEM_CONSUME_ACTION};
use crate::plugins::RegistryConfig;
use crate::types::*;
use crate::{RealmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::path::Path;

/// 宿主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// 宿主基础设置
    pub host: HostSettings,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 插件注册表配置
    #[serde(default)]
    pub registry: RegistryConfig,
    /// 监听组，按声明顺序启动
    #[serde(default)]
    pub listener_groups: Vec<ListenerGroupConfig>,
    /// 插件配置覆盖项
    #[serde(default)]
    pub plug_ins: Vec<PlugInConfiguration>,
    /// 物品升级规则
    #[serde(default)]
    pub upgrade_rules: Vec<UpgradeRuleEntry>,
}

/// 宿主基础设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// 宿主名称
    pub name: String,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// 监听组配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerGroupConfig {
    /// 组名
    pub name: String,
    /// 监听地址
    pub addresses: Vec<SocketAddr>,
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// 插件配置覆盖项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugInConfiguration {
    /// 能力名称
    pub capability: CapabilityName,
    /// 插件身份
    pub identity: PlugInId,
    /// 覆盖启用状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// 覆盖自定义配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_configuration: Option<serde_json::Value>,
}

/// 物品升级规则条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRuleEntry {
    /// 注册到的能力
    #[serde(default = "default_upgrade_capability")]
    pub capability: CapabilityName,
    /// 插件身份
    pub identity: PlugInId,
    /// 描述
    #[serde(default)]
    pub description: String,
    /// 最低客户端要求
    #[serde(default)]
    pub minimum_client: MinimumClient,
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 规则
    pub rule: UpgradeRuleConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_upgrade_capability() -> CapabilityName {
    ITEM_CONSUME_ACTION.to_string()
}

/// 不可升级的物品组：翅膀、首饰、消耗品
fn non_upgradable_groups() -> BTreeSet<ItemGroupId> {
    [ItemGroupId(12), ItemGroupId(13), ItemGroupId(14)].into_iter().collect()
}

impl Default for HostConfig {
    fn default() -> Self {
        let listener = |name: &str, port: u16| ListenerGroupConfig {
            name: name.to_string(),
            addresses: vec![SocketAddr::from(([0, 0, 0, 0], port))],
            enabled: true,
        };

        Self {
            host: HostSettings {
                name: "RealmHost".to_string(),
            },
            logging: LoggingConfig::default(),
            registry: RegistryConfig::default(),
            listener_groups: vec![
                listener("Login", 44405),
                listener("World", 55901),
                listener("Connect", 44406),
            ],
            plug_ins: Vec::new(),
            upgrade_rules: vec![
                UpgradeRuleEntry {
                    capability: default_upgrade_capability(),
                    identity: "jewel-of-bless".to_string(),
                    description: "Raises the item level by one, up to level 6".to_string(),
                    minimum_client: MinimumClient::any(),
                    enabled: true,
                    rule: UpgradeRuleConfig {
                        success_rate_percentage: 100,
                        minimum_level: 0,
                        maximum_level: 5,
                        disallowed_item_groups: non_upgradable_groups(),
                        ..Default::default()
                    },
                },
                UpgradeRuleEntry {
                    capability: default_upgrade_capability(),
                    identity: "jewel-of-soul".to_string(),
                    description: "Raises the item level by one, up to level 9".to_string(),
                    minimum_client: MinimumClient::any(),
                    enabled: true,
                    rule: UpgradeRuleConfig {
                        success_rate_percentage: 50,
                        success_rate_bonus_with_luck_percentage: 25,
                        minimum_level: 6,
                        maximum_level: 8,
                        disallowed_item_groups: non_upgradable_groups(),
                        ..Default::default()
                    },
                },
                UpgradeRuleEntry {
                    capability: default_upgrade_capability(),
                    identity: "jewel-of-soul-extended".to_string(),
                    description: "Raises the item level by one, up to level 15; failures above level 9 reset the item"
                        .to_string(),
                    minimum_client: MinimumClient::new(4, 0, 0, ClientLanguage::Invariant),
                    enabled: true,
                    rule: UpgradeRuleConfig {
                        success_rate_percentage: 50,
                        success_rate_bonus_with_luck_percentage: 25,
                        minimum_level: 6,
                        maximum_level: 14,
                        disallowed_item_groups: non_upgradable_groups(),
                        reset_to_level0_when_fail_min_level: 9,
                        ..Default::default()
                    },
                },
            ],
        }
    }
}

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// 按扩展名判断格式，未知扩展名按YAML处理
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }

    pub fn parse(&self, content: &str) -> Result<HostConfig> {
        match self {
            Self::Yaml => Ok(serde_yaml::from_str(content)?),
            Self::Toml => toml::from_str(content)
                .map_err(|e| RealmError::config(&format!("Failed to parse config file: {}", e))),
        }
    }

    pub fn render(&self, config: &HostConfig) -> Result<String> {
        match self {
            Self::Yaml => Ok(serde_yaml::to_string(config)?),
            Self::Toml => toml::to_string_pretty(config)
                .map_err(|e| RealmError::config(&format!("Failed to serialize config: {}", e))),
        }
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: HostConfig,
}

impl ConfigManager {
    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RealmError::config(&format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config = ConfigFormat::from_path(path).parse(&content)?;
        Ok(Self { config })
    }

    /// 创建默认配置
    pub fn new_default() -> Self {
        Self {
            config: HostConfig::default(),
        }
    }

    pub fn from_config(config: HostConfig) -> Self {
        Self { config }
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = ConfigFormat::from_path(path).render(&self.config)?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| RealmError::config(&format!("Failed to write config file {}: {}", path.display(), e)))?;

        Ok(())
    }

    /// 获取配置
    pub fn get_config(&self) -> &HostConfig {
        &self.config
    }

    /// 获取可变配置
    pub fn get_config_mut(&mut self) -> &mut HostConfig {
        &mut self.config
    }

    pub fn into_config(self) -> HostConfig {
        self.config
    }

    /// 获取启用的监听组
    pub fn get_enabled_listener_groups(&self) -> Vec<&ListenerGroupConfig> {
        self.config.listener_groups.iter().filter(|group| group.enabled).collect()
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.config.host.name.is_empty() {
            return Err(RealmError::config("Host name cannot be empty"));
        }

        if self.config.registry.max_plug_ins_per_capability == 0 {
            return Err(RealmError::config("Registry must allow at least one plug-in per capability"));
        }

        let mut group_names = HashSet::new();
        for group in &self.config.listener_groups {
            if group.name.is_empty() {
                return Err(RealmError::config("Listener group name cannot be empty"));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(RealmError::config(&format!("Duplicate listener group '{}'", group.name)));
            }
            if group.enabled && group.addresses.is_empty() {
                return Err(RealmError::config(&format!(
                    "Listener group '{}' has no addresses",
                    group.name
                )));
            }
        }

        let mut identities = HashSet::new();
        for entry in &self.config.upgrade_rules {
            if entry.identity.is_empty() {
                return Err(RealmError::config("Upgrade rule identity cannot be empty"));
            }
            if !identities.insert((entry.capability.as_str(), entry.identity.as_str())) {
                return Err(RealmError::config(&format!(
                    "Duplicate upgrade rule '{}' for capability '{}'",
                    entry.identity, entry.capability
                )));
            }
            entry.rule.validate().map_err(|e| RealmError::InvalidConfiguration {
                identity: entry.identity.clone(),
                message: e.to_string(),
            })?;
        }

        for plug_in in &self.config.plug_ins {
            if plug_in.capability.is_empty() || plug_in.identity.is_empty() {
                return Err(RealmError::config("Plug-in configuration needs a capability and an identity"));
            }
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }
}

/// 生成默认配置文件
pub async fn generate_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let config_manager = ConfigManager::new_default();
    config_manager.save_to_file(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_manager_default() {
        let config_manager = ConfigManager::new_default();
        let config = config_manager.get_config();

        assert_eq!(config.host.name, "RealmHost");
        let names: Vec<_> = config.listener_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Login", "World", "Connect"]);
        assert_eq!(config.upgrade_rules.len(), 3);

        assert!(config_manager.validate().is_ok());
    }

    #[tokio::test]
    async fn test_config_save_and_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("realm_host.yaml");

        let config_manager = ConfigManager::new_default();
        config_manager.save_to_file(&path).await.unwrap();

        let loaded = ConfigManager::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.get_config(), config_manager.get_config());
    }

    #[tokio::test]
    async fn test_config_save_and_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("realm_host.toml");

        generate_default_config_file(&path).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("[host]"));

        let loaded = ConfigManager::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.get_config(), &HostConfig::default());
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = ConfigManager::load_from_file(dir.path().join("absent.yaml")).await;
        assert!(matches!(result, Err(RealmError::Config { .. })));
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
host:
  name: test
listener_groups:
  - name: World
    addresses: ["127.0.0.1:55901"]
upgrade_rules:
  - identity: jewel-of-bless
    rule:
      success_rate_percentage: 100
      maximum_level: 5
plug_ins:
  - capability: item-consume-action
    identity: jewel-of-bless
    enabled: false
"#;
        let config = ConfigFormat::Yaml.parse(yaml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.listener_groups[0].enabled);

        let rule = &config.upgrade_rules[0];
        assert_eq!(rule.capability, ITEM_CONSUME_ACTION);
        assert_eq!(rule.minimum_client, MinimumClient::any());
        assert_eq!(rule.rule.level_amount, 1);
        assert_eq!(config.plug_ins[0].enabled, Some(false));
        assert!(config.plug_ins[0].custom_configuration.is_none());
    }

    #[test]
    fn test_validation_rejects_duplicate_groups() {
        let mut config_manager = ConfigManager::new_default();
        let duplicate = config_manager.get_config().listener_groups[0].clone();
        config_manager.get_config_mut().listener_groups.push(duplicate);
        assert!(matches!(config_manager.validate(), Err(RealmError::Config { .. })));
    }

    #[test]
    fn test_validation_rejects_invalid_rule() {
        let mut config_manager = ConfigManager::new_default();
        config_manager.get_config_mut().upgrade_rules[0].rule.minimum_level = 10;
        assert!(matches!(
            config_manager.validate(),
            Err(RealmError::InvalidConfiguration { ref identity, .. }) if identity == "jewel-of-bless"
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a")), ConfigFormat::Yaml);
    }
}
