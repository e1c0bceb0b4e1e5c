#![deny(warnings)]

use std::sync::Arc;

use clap::Parser;
use spa_backend::{
    DynError,
    assets::StaticAssetRouter,
    config::{AppConfig, Param},
    handler::{RouterOptions, build_router},
    metrics::{MetricRegistry, register_http_metrics},
};

const CARGO_CRATE_NAME: &str = env!("CARGO_CRATE_NAME");

/// # 启动流程
/// 1. 解析命令行和配置文件
/// 2. 初始化日志
/// 3. 注册指标，准备静态文件目录
/// 4. 构建路由，启动服务器，收到信号后优雅退出
#[tokio::main]
pub async fn main() -> Result<(), DynError> {
    let param = Param::parse();
    let config = AppConfig::from_param(&param)?;
    spa_backend::init_log::init(CARGO_CRATE_NAME, &config.log_level)?;

    let registry = if config.metrics.enabled {
        let registry = Arc::new(MetricRegistry::new());
        register_http_metrics(&registry, &config.metrics.buckets)?;
        Some(registry)
    } else {
        log::info!("metrics disabled");
        None
    };

    let assets = match &config.static_files {
        Some(static_files) => {
            if !static_files.root.is_dir() {
                log::warn!("static root {} is not a directory", static_files.root.display());
            }
            log::info!("serving {} with fallback {}", static_files.root.display(), static_files.fallback);
            Some(StaticAssetRouter::new(&static_files.root, &static_files.fallback)?)
        }
        None => None,
    };

    let router = build_router(RouterOptions {
        registry,
        assets,
        request_timeout: config.request_timeout(),
        cors: config.cors,
    });
    let (server, shutdown_tx) = spa_backend::new_server(config.port, router);
    tokio::spawn(async move {
        match spa_backend::wait_signal().await {
            Ok(()) => {
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                // dropping the sender would stop the server, keep it alive
                log::warn!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    server.with_timeout(config.idle_timeout()).run().await?;
    Ok(())
}
