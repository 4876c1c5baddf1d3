//! 生命周期管理模块
//!
//! 监听组、容器以及TCP端点实现

pub mod container;
pub mod group;
pub mod tcp;

pub use container::*;
pub use group::*;
pub use tcp::*;
