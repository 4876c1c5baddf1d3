//! 能力解析
//!
//! 在调用时根据客户端版本、语言和特性开关，从同一能力的多个候选实现中选出唯一的实现

use super::core::CapabilityDescriptor;
use super::registry::CapabilityRegistry;
use crate::types::ResolutionContext;
use std::any::Any;
use std::sync::Arc;

/// 解析结果
#[derive(Debug, Clone)]
pub enum Resolution {
    /// 选中的描述符
    Resolved(Arc<CapabilityDescriptor>),
    /// 没有适用的实现：该能力对此上下文不受支持
    NoMatch,
}

impl Resolution {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn descriptor(&self) -> Option<&Arc<CapabilityDescriptor>> {
        match self {
            Self::Resolved(descriptor) => Some(descriptor),
            Self::NoMatch => None,
        }
    }

    /// 选中插件的身份
    pub fn identity(&self) -> Option<&str> {
        self.descriptor().map(|d| d.identity.as_str())
    }

    /// 以具体类型取出实现
    pub fn implementation<I>(&self) -> Option<I>
    where
        I: Any + Send + Sync + Clone,
    {
        self.descriptor()?.implementation::<I>().cloned()
    }
}

/// 从按注册顺序排列的描述符中选出最匹配的一个
///
/// 1. 只保留已启用的描述符；
/// 2. 只保留特性开关和最低客户端均满足的描述符；
/// 3. 选择最低版本最高者，版本相同时先注册者胜出。
pub fn select_candidate(
    descriptors: &[Arc<CapabilityDescriptor>],
    context: &ResolutionContext,
) -> Option<Arc<CapabilityDescriptor>> {
    let mut best: Option<&Arc<CapabilityDescriptor>> = None;

    for descriptor in descriptors
        .iter()
        .filter(|d| d.enabled)
        .filter(|d| d.applies_to(context))
    {
        let more_specific = best.map_or(true, |current| {
            descriptor.minimum_client.version() > current.minimum_client.version()
        });
        if more_specific {
            best = Some(descriptor);
        }
    }

    best.cloned()
}

/// 所有适用的描述符，按优先级从高到低排列
pub fn rank_candidates(
    descriptors: &[Arc<CapabilityDescriptor>],
    context: &ResolutionContext,
) -> Vec<Arc<CapabilityDescriptor>> {
    let mut candidates: Vec<_> = descriptors
        .iter()
        .filter(|d| d.enabled && d.applies_to(context))
        .cloned()
        .collect();

    // 稳定排序保持同版本下的注册顺序
    candidates.sort_by(|a, b| b.minimum_client.version().cmp(a.minimum_client.version()));
    candidates
}

/// 绑定到单个调用方上下文的解析器
///
/// 例如每个已连接的客户端持有一个解析器；注册表的变更对其立即可见。
#[derive(Clone)]
pub struct CapabilityResolver {
    registry: Arc<CapabilityRegistry>,
    context: ResolutionContext,
}

impl CapabilityResolver {
    pub fn new(registry: Arc<CapabilityRegistry>, context: ResolutionContext) -> Self {
        Self { registry, context }
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// 解析能力
    pub fn resolve(&self, capability: &str) -> Resolution {
        self.registry.resolve(capability, &self.context)
    }

    /// 解析能力并以具体类型取出实现
    pub fn resolve_as<I>(&self, capability: &str) -> Option<I>
    where
        I: Any + Send + Sync + Clone,
    {
        self.resolve(capability).implementation::<I>()
    }

    pub fn candidates(&self, capability: &str) -> Vec<Arc<CapabilityDescriptor>> {
        self.registry.candidates(capability, &self.context)
    }
}
