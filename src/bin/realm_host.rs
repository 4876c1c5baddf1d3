//! RealmHost 主程序 - 配置驱动运行
//!
//! 通过YAML/TOML配置文件启动监听组与插件

use anyhow::Context;
use async_trait::async_trait;
use realm_host::{
    builtin_bootstrap, generate_default_config_file, initialize_logging, CapabilityRegistry, ConfigManager,
    ConnectionHandler, ContainerHooks, LifecycleContainer, ListenerGroup, NoopHooks,
    PlugInConfigurationRefresh, ReinitSignal, TcpEndpoints,
};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "realm_host.yaml";

/// 只记录连接的处理器
struct LoggingConnectionHandler {
    group: String,
}

#[async_trait]
impl ConnectionHandler for LoggingConnectionHandler {
    async fn handle(&self, mut stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
        tracing::info!("🔌 [{}] 新连接: {}", self.group, peer);
        let mut buffer = [0u8; 1024];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                read = stream.read(&mut buffer) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => tracing::debug!("[{}] {} 发送了 {} 字节", self.group, peer, n),
                },
            }
        }
        tracing::info!("🔌 [{}] 连接关闭: {}", self.group, peer);
    }
}

/// 程序入口点
#[tokio::main]
async fn main() {
    if let Err(e) = run_main().await {
        tracing::error!("❌ 程序运行失败: {:#}", e);
        eprintln!("realm_host: {:#}", e);
        std::process::exit(1);
    }
}

/// 主要逻辑函数
async fn run_main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.len() {
        1 => {
            let config_manager = ConfigManager::new_default();
            run_host(config_manager, None).await
        }
        2 => match args[1].as_str() {
            "init" => generate_config_file().await,
            path => {
                if !Path::new(path).exists() {
                    anyhow::bail!("配置文件不存在: {} (使用 'realm_host init' 生成默认配置文件)", path);
                }
                let config_manager = ConfigManager::load_from_file(path)
                    .await
                    .with_context(|| format!("加载配置文件失败: {}", path))?;
                run_host(config_manager, Some(path)).await
            }
        },
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// 启动宿主并等待退出信号
async fn run_host(config_manager: ConfigManager, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = config_manager.get_config();
    initialize_logging(&config.logging);
    config_manager.validate()?;

    tracing::info!("🚀 启动 {}", config.host.name);
    if let Some(path) = config_path {
        tracing::info!("📄 配置文件: {}", path);
    }

    let registry = Arc::new(CapabilityRegistry::new(config.registry.clone()));
    let report = builtin_bootstrap(config)?.apply(&registry, &config.plug_ins)?;
    tracing::info!("🧩 已注册 {} 个插件", report.registered.len());

    let hooks: Arc<dyn ContainerHooks> = match config_path {
        Some(path) => Arc::new(PlugInConfigurationRefresh::new(
            path,
            registry.clone(),
            report.registered.clone(),
        )),
        None => Arc::new(NoopHooks),
    };

    let signal = ReinitSignal::new();
    let mut builder = LifecycleContainer::builder(config.host.name.clone(), signal.clone()).hooks(hooks);
    for group in config_manager.get_enabled_listener_groups() {
        let handler = Arc::new(LoggingConnectionHandler {
            group: group.name.clone(),
        });
        let endpoints = Arc::new(TcpEndpoints::new(group.addresses.clone(), handler));
        builder = builder.group(ListenerGroup::new(group.name.clone(), endpoints));
    }
    let container = builder.build()?;

    let cancel = CancellationToken::new();
    if let Err(e) = container.start(&cancel).await {
        tracing::warn!("⚠️ 部分监听组启动失败: {}", e);
    }
    tracing::info!("✅ 宿主状态: {:?}", container.state());

    wait_for_shutdown(&signal).await?;

    tracing::info!("🛑 正在停止 {}", config.host.name);
    container.stop(&cancel).await?;
    tracing::info!("🎉 已停止");
    Ok(())
}

/// 等待 Ctrl-C；Unix 下 SIGHUP 触发一次重新初始化
#[cfg(unix)]
async fn wait_for_shutdown(signal: &ReinitSignal) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut hangup = unix_signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            Some(()) = hangup.recv() => {
                tracing::info!("🔄 收到 SIGHUP，发布重新初始化信号");
                // 重启在后台进行，Ctrl-C 仍可随时响应
                let signal = signal.clone();
                tokio::spawn(async move {
                    signal.publish().await;
                });
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_signal: &ReinitSignal) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// 生成默认配置文件
async fn generate_config_file() -> anyhow::Result<()> {
    println!("📝 生成默认配置文件: {}", DEFAULT_CONFIG_PATH);
    generate_default_config_file(DEFAULT_CONFIG_PATH).await?;
    println!("🔧 请编辑配置文件后运行: realm_host {}", DEFAULT_CONFIG_PATH);
    Ok(())
}

/// 显示使用说明
fn print_usage() {
    println!("RealmHost - 游戏服务器插件与生命周期宿主");
    println!();
    println!("使用方法:");
    println!("  realm_host                    使用默认配置运行");
    println!("  realm_host init               生成默认配置文件");
    println!("  realm_host <config_file>      使用指定配置文件运行 (.yaml / .toml)");
}
