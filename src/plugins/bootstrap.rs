//! 插件启动注册表
//!
//! 以显式的注册表格代替运行时扫描：宿主在启动时按表格顺序注册全部内置插件，
//! 再应用配置文件中的覆盖项（启用状态、自定义配置）。

use super::core::CapabilityDescriptor;
use super::registry::{identities, CapabilityRegistry};
use crate::actions::{ItemConsumeAction, UpgradeItemLevelAction};
use crate::config::{ConfigManager, HostConfig, PlugInConfiguration};
use crate::lifecycle::ContainerHooks;
use crate::types::{CapabilityName, PlugInId};
use crate::{RealmError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 注册表格中的一项
#[derive(Debug)]
pub struct BootstrapEntry {
    pub capability: CapabilityName,
    pub descriptor: CapabilityDescriptor,
}

/// 启动结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// 已注册的插件
    pub registered: Vec<(CapabilityName, PlugInId)>,
    /// 覆盖项应用结果
    pub overrides: OverrideReport,
}

/// 覆盖项应用结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideReport {
    /// 成功应用的覆盖项数量
    pub applied: usize,
    /// 找不到目标插件的覆盖项
    pub unknown: Vec<(CapabilityName, PlugInId)>,
}

/// 插件注册表格
#[derive(Debug, Default)]
pub struct PlugInBootstrap {
    entries: Vec<BootstrapEntry>,
}

impl PlugInBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一项
    pub fn with(mut self, capability: impl Into<CapabilityName>, descriptor: CapabilityDescriptor) -> Self {
        self.entries.push(BootstrapEntry {
            capability: capability.into(),
            descriptor,
        });
        self
    }

    pub fn entries(&self) -> &[BootstrapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按表格顺序注册全部插件，再应用覆盖项
    ///
    /// 注册失败立即返回；找不到目标的覆盖项只记录告警。
    pub fn apply(self, registry: &CapabilityRegistry, overrides: &[PlugInConfiguration]) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let mut capabilities = BTreeSet::new();

        for entry in self.entries {
            let identity = entry.descriptor.identity.clone();
            registry.register(&entry.capability, entry.descriptor)?;
            capabilities.insert(entry.capability.clone());
            report.registered.push((entry.capability, identity));
        }

        report.overrides = apply_overrides(registry, overrides)?;

        for capability in &capabilities {
            info!(
                "Capability '{}' provides plug-ins {:?}",
                capability,
                identities(&registry.descriptors(capability))
            );
        }
        Ok(report)
    }

    /// 以本表格整体替换 `previous` 中由上一张表格注册的插件
    ///
    /// 保留下来的插件回到表格中的默认状态，不再出现的插件被注销。返回新的注册列表。
    pub fn replace(
        self,
        registry: &CapabilityRegistry,
        previous: &[(CapabilityName, PlugInId)],
    ) -> Result<Vec<(CapabilityName, PlugInId)>> {
        let registered: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.capability.clone(), entry.descriptor.identity.clone()))
            .collect();
        let entries = self
            .entries
            .into_iter()
            .map(|entry| (entry.capability, entry.descriptor))
            .collect();

        registry.replace_set(previous, entries)?;
        Ok(registered)
    }
}

/// 将配置覆盖项应用到注册表
pub fn apply_overrides(registry: &CapabilityRegistry, overrides: &[PlugInConfiguration]) -> Result<OverrideReport> {
    let mut report = OverrideReport::default();

    for plug_in in overrides {
        if registry.get(&plug_in.capability, &plug_in.identity).is_err() {
            warn!(
                "Configuration refers to unknown plug-in '{}' of capability '{}'",
                plug_in.identity, plug_in.capability
            );
            report.unknown.push((plug_in.capability.clone(), plug_in.identity.clone()));
            continue;
        }

        if let Some(enabled) = plug_in.enabled {
            registry.set_enabled(&plug_in.capability, &plug_in.identity, enabled)?;
        }
        if let Some(configuration) = &plug_in.custom_configuration {
            registry.set_configuration(&plug_in.capability, &plug_in.identity, Some(configuration.clone()))?;
        }
        report.applied += 1;
    }

    debug!(
        "Applied {} plug-in override(s), {} unknown",
        report.applied,
        report.unknown.len()
    );
    Ok(report)
}

/// 由宿主配置构建内置插件表格
pub fn builtin_bootstrap(config: &HostConfig) -> Result<PlugInBootstrap> {
    let mut bootstrap = PlugInBootstrap::new();

    for entry in &config.upgrade_rules {
        let action = UpgradeItemLevelAction::new(entry.rule.clone()).map_err(|e| RealmError::InvalidConfiguration {
            identity: entry.identity.clone(),
            message: e.to_string(),
        })?;
        let implementation: Arc<dyn ItemConsumeAction> = Arc::new(action);

        let descriptor = CapabilityDescriptor::new(entry.identity.clone(), entry.description.clone(), implementation)
            .with_minimum_client(entry.minimum_client.clone())
            .with_enabled(entry.enabled);
        bootstrap = bootstrap.with(entry.capability.clone(), descriptor);
    }

    Ok(bootstrap)
}

/// 重新初始化后刷新插件配置
///
/// 仅在由重新初始化触发的重启中，重新读取配置文件，按新的规则表重建内置插件，
/// 再在默认状态之上应用插件覆盖项。删除的覆盖项因此不再生效。
/// 表格之外注册的插件没有已知的默认状态，其覆盖项只会被再次应用。
pub struct PlugInConfigurationRefresh {
    path: PathBuf,
    registry: Arc<CapabilityRegistry>,
    owned: Mutex<Vec<(CapabilityName, PlugInId)>>,
}

impl PlugInConfigurationRefresh {
    /// `registered` 为启动时表格注册的插件，即 [`BootstrapReport::registered`]
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<CapabilityRegistry>,
        registered: Vec<(CapabilityName, PlugInId)>,
    ) -> Self {
        Self {
            path: path.into(),
            registry,
            owned: Mutex::new(registered),
        }
    }

    /// 当前由表格管理的插件
    pub fn owned(&self) -> Vec<(CapabilityName, PlugInId)> {
        self.owned.lock().clone()
    }
}

#[async_trait]
impl ContainerHooks for PlugInConfigurationRefresh {
    async fn before_start(&self, on_reinit: bool, cancel: &CancellationToken) -> Result<()> {
        if !on_reinit {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(RealmError::cancelled("configuration refresh"));
        }

        let manager = ConfigManager::load_from_file(&self.path).await?;
        manager.validate()?;
        let config = manager.get_config();

        let bootstrap = builtin_bootstrap(config)?;
        let previous = self.owned();
        let registered = bootstrap.replace(&self.registry, &previous)?;
        let count = registered.len();
        *self.owned.lock() = registered;

        let report = apply_overrides(&self.registry, &config.plug_ins)?;

        info!(
            "Reloaded plug-in configuration from {} ({} plug-in(s), {} override(s))",
            self.path.display(),
            count,
            report.applied
        );
        Ok(())
    }
}
