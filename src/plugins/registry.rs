//! 能力注册表
//!
//! 按能力名称保存已注册的插件描述符，提供注册、注销、启用/禁用、配置更新和解析查询。
//!
//! 注册表以写时复制的不可变快照发布：写操作在互斥锁内克隆当前快照、修改后整体替换；
//! 解析只读取一次快照，因此要么看到变更前的状态，要么看到变更后的状态。

use super::core::CapabilityDescriptor;
use super::resolver::{rank_candidates, select_candidate, Resolution};
use crate::types::{CapabilityName, PlugInId, ResolutionContext};
use crate::{RealmError, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// 注册表配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 每个能力允许的最大插件数量
    pub max_plug_ins_per_capability: usize,
    /// 是否按Schema校验自定义配置
    pub validate_configuration: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_plug_ins_per_capability: 256,
            validate_configuration: true,
        }
    }
}

/// 注册表的不可变快照
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// 能力 -> 按注册顺序排列的描述符
    capabilities: HashMap<CapabilityName, Vec<Arc<CapabilityDescriptor>>>,
    /// 快照代数，每次变更递增
    generation: u64,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 某能力下按注册顺序排列的描述符
    pub fn descriptors(&self, capability: &str) -> &[Arc<CapabilityDescriptor>] {
        self.capabilities
            .get(capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn capability_names(&self) -> Vec<CapabilityName> {
        let mut names: Vec<_> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, capability: &str, identity: &str) -> Option<&Arc<CapabilityDescriptor>> {
        self.descriptors(capability).iter().find(|d| d.identity == identity)
    }

    fn position(&self, capability: &str, identity: &str) -> Result<usize> {
        self.descriptors(capability)
            .iter()
            .position(|d| d.identity == identity)
            .ok_or_else(|| RealmError::not_found(capability, identity))
    }
}

/// 能力注册表
pub struct CapabilityRegistry {
    /// 当前快照
    snapshot: ArcSwap<RegistrySnapshot>,
    /// 串行化写操作
    write_lock: Mutex<()>,
    /// 注册表配置
    config: RegistryConfig,
}

impl CapabilityRegistry {
    /// 创建新的能力注册表
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            write_lock: Mutex::new(()),
            config,
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// 注册插件
    pub fn register(&self, capability: &str, descriptor: CapabilityDescriptor) -> Result<()> {
        if self.config.validate_configuration {
            descriptor.validate_configuration(descriptor.configuration.as_ref())?;
        }

        let identity = descriptor.identity.clone();
        self.mutate(|snapshot| {
            let descriptors = snapshot.capabilities.entry(capability.to_string()).or_default();

            if descriptors.iter().any(|d| d.identity == descriptor.identity) {
                return Err(RealmError::DuplicateIdentity {
                    capability: capability.to_string(),
                    identity: descriptor.identity.clone(),
                });
            }

            if descriptors.len() >= self.config.max_plug_ins_per_capability {
                return Err(RealmError::RegistryFull {
                    capability: capability.to_string(),
                    limit: self.config.max_plug_ins_per_capability,
                });
            }

            descriptors.push(Arc::new(descriptor));
            Ok(())
        })?;

        info!("Plug-in '{}' registered for capability '{}'", identity, capability);
        Ok(())
    }

    /// 注销插件
    pub fn unregister(&self, capability: &str, identity: &str) -> Result<Arc<CapabilityDescriptor>> {
        let removed = self.mutate(|snapshot| {
            let index = snapshot.position(capability, identity)?;
            let descriptors = snapshot
                .capabilities
                .get_mut(capability)
                .ok_or_else(|| RealmError::not_found(capability, identity))?;
            let removed = descriptors.remove(index);
            if descriptors.is_empty() {
                snapshot.capabilities.remove(capability);
            }
            Ok(removed)
        })?;

        info!("Plug-in '{}' unregistered from capability '{}'", identity, capability);
        Ok(removed)
    }

    /// 以一次变更整体替换一组插件
    ///
    /// `previous` 中的插件若在 `entries` 中再次出现则原位替换，保持注册顺序；
    /// 不再出现的被注销；新插件追加在末尾。与 `previous` 之外的插件身份冲突时整体失败，注册表保持不变。
    pub fn replace_set(
        &self,
        previous: &[(CapabilityName, PlugInId)],
        entries: Vec<(CapabilityName, CapabilityDescriptor)>,
    ) -> Result<()> {
        if self.config.validate_configuration {
            for (_, descriptor) in &entries {
                descriptor.validate_configuration(descriptor.configuration.as_ref())?;
            }
        }

        let owned: HashSet<(&str, &str)> = previous
            .iter()
            .map(|(capability, identity)| (capability.as_str(), identity.as_str()))
            .collect();
        let kept: HashSet<(CapabilityName, PlugInId)> = entries
            .iter()
            .map(|(capability, descriptor)| (capability.clone(), descriptor.identity.clone()))
            .collect();
        let count = entries.len();
        let limit = self.config.max_plug_ins_per_capability;

        self.mutate(|snapshot| {
            for (capability, descriptor) in entries {
                let descriptors = snapshot.capabilities.entry(capability.clone()).or_default();
                match descriptors.iter().position(|d| d.identity == descriptor.identity) {
                    Some(index) if owned.contains(&(capability.as_str(), descriptor.identity.as_str())) => {
                        descriptors[index] = Arc::new(descriptor);
                    }
                    Some(_) => {
                        return Err(RealmError::DuplicateIdentity {
                            capability,
                            identity: descriptor.identity,
                        });
                    }
                    None => {
                        if descriptors.len() >= limit {
                            return Err(RealmError::RegistryFull { capability, limit });
                        }
                        descriptors.push(Arc::new(descriptor));
                    }
                }
            }

            for (capability, identity) in previous {
                if kept.contains(&(capability.clone(), identity.clone())) {
                    continue;
                }
                if let Some(descriptors) = snapshot.capabilities.get_mut(capability) {
                    descriptors.retain(|d| d.identity != *identity);
                    if descriptors.is_empty() {
                        snapshot.capabilities.remove(capability);
                    }
                }
            }
            Ok(())
        })?;

        info!("Replaced plug-in set ({} owned before, {} now)", previous.len(), count);
        Ok(())
    }

    /// 启用或禁用插件
    pub fn set_enabled(&self, capability: &str, identity: &str, enabled: bool) -> Result<()> {
        self.replace_descriptor(capability, identity, |descriptor| {
            descriptor.enabled = enabled;
            Ok(())
        })?;

        info!(
            "Plug-in '{}' of capability '{}' {}",
            identity,
            capability,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// 更新插件的自定义配置
    pub fn set_configuration(
        &self,
        capability: &str,
        identity: &str,
        configuration: Option<serde_json::Value>,
    ) -> Result<()> {
        let validate = self.config.validate_configuration;
        self.replace_descriptor(capability, identity, |descriptor| {
            if validate {
                descriptor.validate_configuration(configuration.as_ref())?;
            }
            descriptor.configuration = configuration;
            Ok(())
        })?;

        debug!("Updated configuration of plug-in '{}' ({})", identity, capability);
        Ok(())
    }

    /// 获取插件描述符
    pub fn get(&self, capability: &str, identity: &str) -> Result<Arc<CapabilityDescriptor>> {
        self.snapshot()
            .get(capability, identity)
            .cloned()
            .ok_or_else(|| RealmError::not_found(capability, identity))
    }

    /// 某能力下按注册顺序排列的描述符
    pub fn descriptors(&self, capability: &str) -> Vec<Arc<CapabilityDescriptor>> {
        self.snapshot().descriptors(capability).to_vec()
    }

    /// 解析能力
    ///
    /// 未知能力同样返回 [`Resolution::NoMatch`]。
    pub fn resolve(&self, capability: &str, context: &ResolutionContext) -> Resolution {
        let snapshot = self.snapshot.load();
        match select_candidate(snapshot.descriptors(capability), context) {
            Some(descriptor) => Resolution::Resolved(descriptor),
            None => Resolution::NoMatch,
        }
    }

    /// 所有适用的描述符，按优先级排列
    pub fn candidates(&self, capability: &str, context: &ResolutionContext) -> Vec<Arc<CapabilityDescriptor>> {
        let snapshot = self.snapshot.load();
        rank_candidates(snapshot.descriptors(capability), context)
    }

    /// 获取注册表统计信息
    pub fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot();
        let mut stats = RegistryStats {
            generation: snapshot.generation,
            ..Default::default()
        };

        for (capability, descriptors) in &snapshot.capabilities {
            let enabled = descriptors.iter().filter(|d| d.enabled).count();
            stats.by_capability.insert(capability.clone(), descriptors.len());
            stats.total_plug_ins += descriptors.len();
            stats.enabled_plug_ins += enabled;
            stats.disabled_plug_ins += descriptors.len() - enabled;
        }

        stats
    }

    // 私有辅助方法

    fn mutate<T>(&self, change: impl FnOnce(&mut RegistrySnapshot) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut next = RegistrySnapshot::clone(&self.snapshot.load());
        let value = change(&mut next)?;
        next.generation += 1;
        self.snapshot.store(Arc::new(next));
        Ok(value)
    }

    fn replace_descriptor(
        &self,
        capability: &str,
        identity: &str,
        change: impl FnOnce(&mut CapabilityDescriptor) -> Result<()>,
    ) -> Result<()> {
        self.mutate(|snapshot| {
            let index = snapshot.position(capability, identity)?;
            let descriptors = snapshot
                .capabilities
                .get_mut(capability)
                .ok_or_else(|| RealmError::not_found(capability, identity))?;
            let mut updated = CapabilityDescriptor::clone(&descriptors[index]);
            change(&mut updated)?;
            descriptors[index] = Arc::new(updated);
            Ok(())
        })
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// 注册表统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// 总插件数量
    pub total_plug_ins: usize,
    pub enabled_plug_ins: usize,
    pub disabled_plug_ins: usize,
    /// 按能力分组的统计
    pub by_capability: HashMap<CapabilityName, usize>,
    /// 快照代数
    pub generation: u64,
}

/// 插件身份列表，便于日志输出
pub fn identities(descriptors: &[Arc<CapabilityDescriptor>]) -> Vec<PlugInId> {
    descriptors.iter().map(|d| d.identity.clone()).collect()
}
