// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! openGauss / PostgreSQL 指标导出命令行工具
//!
//! 解析参数、初始化日志，并通过 HTTP 暴露采集结果

mod args;
mod web;

use clap::Parser;
use og_exporter::Exporter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use args::Args;
use web::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let exporter = Exporter::new(args.exporter_config())?;

    if args.dry_run {
        println!("{}", exporter.explain_queries()?);
        return Ok(());
    }

    let bind_address = args.bind_address();
    let state = AppState::new(args, exporter);
    let app = web::router(state.clone());

    #[cfg(unix)]
    tokio::spawn(reload_on_sighup(state.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("og_exporter listening on {}", bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.exporter().await.close().await;
    info!("og_exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_sighup(state: AppState) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading");
        if let Err(e) = state.reload().await {
            error!("fail to reload exporter: {}", e);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
