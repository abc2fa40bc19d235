// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! HTTP 暴露与热重载

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use og_exporter::{Exporter, ExporterResult};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::args::Args;

/// 共享状态：当前导出器实例与构造参数
#[derive(Clone)]
pub struct AppState {
    args: Arc<Args>,
    exporter: Arc<RwLock<Arc<Exporter>>>,
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// 创建共享状态
    pub fn new(args: Args, exporter: Exporter) -> Self {
        Self {
            args: Arc::new(args),
            exporter: Arc::new(RwLock::new(Arc::new(exporter))),
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 当前导出器实例
    pub async fn exporter(&self) -> Arc<Exporter> {
        self.exporter.read().await.clone()
    }

    /// 以当前参数重建导出器，失败时保留旧实例
    pub async fn reload(&self) -> ExporterResult<()> {
        let _guard = self.reload_lock.lock().await;
        debug!("reload request received, launch new exporter instance");

        let fresh = Arc::new(Exporter::new(self.args.exporter_config())?);
        let previous = std::mem::replace(&mut *self.exporter.write().await, fresh);

        debug!("shutdown old exporter instance");
        previous.close().await;
        info!("server reloaded");
        Ok(())
    }
}

/// 构建路由
pub fn router(state: AppState) -> Router {
    let telemetry_path = state.args.telemetry_path.clone();
    Router::new()
        .route("/", get(index))
        .route(&telemetry_path, get(metrics))
        .route("/version", get(version))
        .route("/reload", get(reload).post(reload))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html><head><title>OG Exporter</title></head><body><h1>OG Exporter</h1>\
         <p><a href='{}'>Metrics</a></p></body></html>",
        state.args.telemetry_path
    ))
}

async fn metrics(State(state): State<AppState>) -> Response {
    let exporter = state.exporter().await;
    match exporter.render().await {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn version() -> String {
    format!("version {}", env!("CARGO_PKG_VERSION"))
}

async fn reload(State(state): State<AppState>) -> Response {
    match state.reload().await {
        Ok(()) => (StatusCode::OK, "server reloaded").into_response(),
        Err(e) => {
            error!("fail to reload exporter: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("fail to reload: {}", e)).into_response()
        }
    }
}
