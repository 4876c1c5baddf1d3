//! 核心基础层模块
//!
//! 提供框架的核心基础设施

pub mod signal;

pub use signal::*;
