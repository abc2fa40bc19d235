// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 目标实例注册表
//!
//! 以连接串为键管理 [`Server`]。映射锁只保护查找与插入，
//! 建立连接与重试在锁外进行，不同连接串的创建互不阻塞

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{Server, ServerOptions};
use crate::config::{ExporterError, ExporterResult};
use crate::driver::Connector;
use crate::dsn::shadow_dsn;

/// 目标实例注册表
pub struct Servers {
    connector: Arc<dyn Connector>,
    options: ServerOptions,
    servers: Mutex<HashMap<String, Arc<Server>>>,
}

impl std::fmt::Debug for Servers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Servers")
            .field("options", &self.options)
            .field("servers", &self.len())
            .finish()
    }
}

impl Servers {
    /// 创建注册表
    pub fn new(connector: Arc<dyn Connector>, options: ServerOptions) -> Self {
        Self {
            connector,
            options,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// 实例选项
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// 获取可用的目标实例，不存在或已失效时建立连接
    ///
    /// 已有实例先做存活探测，失败则在原实例上重连；
    /// 重试耗尽后从注册表移除并返回连接错误
    ///
    /// # Errors
    ///
    /// 连接串无法解析或重试耗尽时返回错误
    pub async fn get_server(&self, dsn: &str) -> ExporterResult<Arc<Server>> {
        let existing = self.servers.lock().get(dsn).cloned();

        if let Some(server) = existing {
            if server.is_ready() && server.ping().await.is_ok() {
                return Ok(server);
            }
            let _guard = server.reconnect_guard().await;
            // 等待期间其他调用者可能已完成重连
            if server.is_ready() {
                return Ok(Arc::clone(&server));
            }
            warn!("Server {} is down, reconnecting", server.fingerprint());
            if let Err(e) = self.connect_with_retry(&server).await {
                self.remove_if_same(dsn, &server);
                return Err(e);
            }
            let registered = self
                .servers
                .lock()
                .entry(dsn.to_string())
                .or_insert_with(|| server.clone())
                .clone();
            if !Arc::ptr_eq(&registered, &server)
                && let Err(e) = server.close().await
            {
                error!("Failed to close duplicate connection to {}: {}", server.fingerprint(), e);
            }
            return Ok(registered);
        }

        let server = Arc::new(Server::new(dsn, self.options.clone())?);
        self.connect_with_retry(&server).await?;

        let winner = {
            let mut servers = self.servers.lock();
            match servers.get(dsn) {
                Some(current) => Some(current.clone()),
                None => {
                    servers.insert(dsn.to_string(), server.clone());
                    None
                }
            }
        };

        // 并发创建时保留先插入的实例
        if let Some(current) = winner {
            if let Err(e) = server.close().await {
                error!("Failed to close duplicate connection to {}: {}", server.fingerprint(), e);
            }
            return Ok(current);
        }
        Ok(server)
    }

    async fn connect_with_retry(&self, server: &Server) -> ExporterResult<()> {
        let attempts = self.options.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match server.connect(self.connector.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Connect to {} failed (attempt {}/{}): {}",
                        shadow_dsn(server.dsn()),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_backoff * attempt).await;
                    }
                }
            }
        }

        Err(ExporterError::Connection(format!(
            "unable to connect to {} after {} attempts: {}",
            server.fingerprint(),
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// 移除目标实例（不关闭连接）
    pub fn remove(&self, dsn: &str) -> Option<Arc<Server>> {
        self.servers.lock().remove(dsn)
    }

    fn remove_if_same(&self, dsn: &str, server: &Arc<Server>) {
        let mut servers = self.servers.lock();
        if servers.get(dsn).is_some_and(|current| Arc::ptr_eq(current, server)) {
            servers.remove(dsn);
        }
    }

    /// 当前管理的全部实例
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.lock().values().cloned().collect()
    }

    /// 实例数量
    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    /// 关闭全部实例
    ///
    /// 单个实例关闭失败只记录日志
    pub async fn close(&self) {
        let servers: Vec<Arc<Server>> = self.servers.lock().drain().map(|(_, server)| server).collect();
        for server in servers {
            match server.close().await {
                Ok(()) => info!("Closed connection to {}", server.fingerprint()),
                Err(e) => error!("Failed to close connection to {}: {}", server.fingerprint(), e),
            }
        }
    }
}
