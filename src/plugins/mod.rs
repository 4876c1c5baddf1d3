//! 插件系统模块
//!
//! 能力描述符、注册表、解析器以及启动注册表格

pub mod bootstrap;
pub mod core;
pub mod registry;
pub mod resolver;

// 重新导出核心组件
pub use bootstrap::*;
pub use self::core::*;
pub use registry::*;
pub use resolver::*;
