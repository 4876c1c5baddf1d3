//! RealmHost - 游戏服务器插件与生命周期宿主
//!
//! 按能力组织可替换的插件实现，并管理一组网络监听组的启动、停止与重启
//!
//! # 模块划分
//!
//! - **插件层**: 能力描述符、注册表、按客户端版本解析插件
//! - **生命周期层**: 监听组、生命周期容器、TCP端点
//! - **动作层**: 物品消耗动作（数据驱动的物品等级提升）
//! - **核心基础层**: 类型系统、错误处理、重新初始化信号、配置

pub mod actions;
pub mod config;
pub mod core;
pub mod error;
pub mod lifecycle;
pub mod plugins;
pub mod types;

// 重新导出核心类型
pub use actions::*;
pub use config::*;
pub use self::core::*;
pub use error::*;
pub use lifecycle::*;
pub use plugins::*;
pub use types::*;

/// 框架信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FRAMEWORK_NAME: &str = "RealmHost";

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RealmError>;

/// 初始化日志系统
///
/// 已存在全局订阅者时不做任何事，返回是否由本次调用安装。
pub fn initialize_logging(config: &LoggingConfig) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Initializing {} v{}", FRAMEWORK_NAME, VERSION);
    }
    installed
}
