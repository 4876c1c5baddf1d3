//! 插件描述符定义
//!
//! 描述某个能力的一个具体实现：身份、适用的最低客户端、启用状态、自定义配置以及实现句柄

use crate::types::*;
use crate::{RealmError, Result};
use jsonschema::JSONSchema;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 类型擦除的插件实现句柄
pub type PlugInHandle = Arc<dyn Any + Send + Sync>;

/// 插件描述符
///
/// 描述符本身不可变；注册表在启用/禁用或更新配置时克隆描述符并整体替换快照，
/// 实现句柄在克隆之间共享。
#[derive(Clone)]
pub struct CapabilityDescriptor {
    /// 插件身份，在同一能力内唯一
    pub identity: PlugInId,
    /// 描述信息
    pub description: String,
    /// 最低客户端要求
    pub minimum_client: MinimumClient,
    /// 是否启用
    pub enabled: bool,
    /// 解析上下文必须具备的特性开关
    pub required_features: Vec<String>,
    /// 自定义配置
    pub configuration: Option<serde_json::Value>,
    /// 自定义配置的JSON Schema
    pub config_schema: Option<serde_json::Value>,
    implementation: PlugInHandle,
}

impl CapabilityDescriptor {
    /// 创建新的描述符，默认启用、对所有客户端开放
    pub fn new<I>(identity: impl Into<PlugInId>, description: impl Into<String>, implementation: I) -> Self
    where
        I: Any + Send + Sync,
    {
        Self {
            identity: identity.into(),
            description: description.into(),
            minimum_client: MinimumClient::any(),
            enabled: true,
            required_features: Vec::new(),
            configuration: None,
            config_schema: None,
            implementation: Arc::new(implementation),
        }
    }

    /// 设置最低客户端要求
    pub fn with_minimum_client(mut self, minimum_client: MinimumClient) -> Self {
        self.minimum_client = minimum_client;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 要求特性开关
    pub fn requires_feature(mut self, feature: impl Into<String>) -> Self {
        self.required_features.push(feature.into());
        self
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_config_schema(mut self, schema: serde_json::Value) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// 以具体类型访问实现
    ///
    /// 注册 `Arc<dyn Trait>` 时应以同样的类型取回，例如 `implementation::<Arc<dyn ItemConsumeAction>>()`。
    pub fn implementation<I>(&self) -> Option<&I>
    where
        I: Any + Send + Sync,
    {
        self.implementation.downcast_ref::<I>()
    }

    /// 原始实现句柄
    pub fn handle(&self) -> PlugInHandle {
        self.implementation.clone()
    }

    /// 两个描述符是否共享同一实现
    pub fn shares_implementation(&self, other: &CapabilityDescriptor) -> bool {
        Arc::ptr_eq(&self.implementation, &other.implementation)
    }

    /// 描述符是否适用于上下文（不考虑启用状态）
    pub fn applies_to(&self, context: &ResolutionContext) -> bool {
        self.required_features
            .iter()
            .all(|feature| context.has_feature(feature))
            && self.minimum_client.is_satisfied_by(&context.client)
    }

    /// 校验自定义配置是否符合Schema
    pub fn validate_configuration(&self, configuration: Option<&serde_json::Value>) -> Result<()> {
        let (Some(schema), Some(value)) = (self.config_schema.as_ref(), configuration) else {
            return Ok(());
        };

        let compiled = JSONSchema::compile(schema).map_err(|e| RealmError::InvalidConfiguration {
            identity: self.identity.clone(),
            message: format!("invalid schema: {}", e),
        })?;

        if let Err(errors) = compiled.validate(value) {
            let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(RealmError::InvalidConfiguration {
                identity: self.identity.clone(),
                message,
            });
        }

        Ok(())
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("identity", &self.identity)
            .field("description", &self.description)
            .field("minimum_client", &self.minimum_client)
            .field("enabled", &self.enabled)
            .field("required_features", &self.required_features)
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct Hello;

    impl Greeter for Hello {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    #[test]
    fn test_implementation_downcast() {
        let greeter: Arc<dyn Greeter> = Arc::new(Hello);
        let descriptor = CapabilityDescriptor::new("hello", "Says hello", greeter);

        let resolved = descriptor.implementation::<Arc<dyn Greeter>>().unwrap();
        assert_eq!(resolved.greet(), "hello");
        assert!(descriptor.implementation::<String>().is_none());
    }

    #[test]
    fn test_clone_shares_implementation() {
        let descriptor = CapabilityDescriptor::new("a", "", 42u32);
        let disabled = descriptor.clone().with_enabled(false);
        assert!(descriptor.shares_implementation(&disabled));
        assert!(descriptor.enabled);
        assert!(!disabled.enabled);
    }

    #[test]
    fn test_required_features_gate_applicability() {
        let descriptor = CapabilityDescriptor::new("siege", "", ()).requires_feature("castle-siege");
        let plain = ResolutionContext::new(ClientVersion::invariant(1, 0, 0));
        assert!(!descriptor.applies_to(&plain));
        assert!(descriptor.applies_to(&plain.with_feature("castle-siege")));
    }

    #[test]
    fn test_configuration_schema_validation() {
        let descriptor = CapabilityDescriptor::new("rate", "", ()).with_config_schema(json!({
            "type": "object",
            "properties": { "rate": { "type": "integer", "minimum": 0, "maximum": 100 } },
            "required": ["rate"]
        }));

        assert!(descriptor.validate_configuration(Some(&json!({ "rate": 40 }))).is_ok());
        assert!(descriptor.validate_configuration(None).is_ok());

        let result = descriptor.validate_configuration(Some(&json!({ "rate": 140 })));
        assert!(matches!(result, Err(RealmError::InvalidConfiguration { .. })));
    }
}
