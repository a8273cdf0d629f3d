//! 客户端注册表
//!
//! 按配置坐标缓存客户端实例，同一坐标在并发首次访问下也只创建一次

use crate::client::{ConfigClient, OpenApiConfigClient};
use crate::config::NacosClientConfig;
use crate::error::ClientError;
use crate::source::ConfigCoordinate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 客户端工厂函数类型
pub type ClientFactory =
    Arc<dyn Fn(&NacosClientConfig) -> Result<Arc<dyn ConfigClient>, ClientError> + Send + Sync>;

/// 配置客户端注册表
///
/// 由组装子系统的一方显式创建并持有，生命周期与所属应用上下文一致。
pub struct ConfigClientRegistry {
    /// 已创建的客户端（坐标 -> 客户端）
    clients: DashMap<ConfigCoordinate, Arc<dyn ConfigClient>>,
    /// 客户端工厂
    factory: ClientFactory,
}

impl std::fmt::Debug for ConfigClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigClientRegistry")
            .field("client_count", &self.clients.len())
            .finish()
    }
}

impl ConfigClientRegistry {
    /// 使用自定义工厂创建注册表
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            clients: DashMap::new(),
            factory,
        }
    }

    /// 使用 Nacos Open API 客户端工厂创建注册表
    pub fn with_open_api_clients() -> Self {
        Self::new(Arc::new(|config: &NacosClientConfig| {
            let client = OpenApiConfigClient::new(config.clone())?;
            Ok(Arc::new(client) as Arc<dyn ConfigClient>)
        }))
    }

    /// 所有坐标共用同一个客户端实例
    pub fn with_shared_client(client: Arc<dyn ConfigClient>) -> Self {
        Self::new(Arc::new(move |_: &NacosClientConfig| Ok(Arc::clone(&client))))
    }

    /// 获取或创建坐标对应的客户端
    ///
    /// 工厂函数对每个坐标至多执行一次：空槽位在分片写锁内完成创建和插入，
    /// 并发调用方都会拿到同一个实例。工厂失败时不插入任何内容，下次调用会重试。
    ///
    /// # 参数
    /// * `endpoint` - 客户端端点配置
    /// * `coordinate` - 配置坐标
    pub fn get_or_create(
        &self,
        endpoint: &NacosClientConfig,
        coordinate: &ConfigCoordinate,
    ) -> Result<Arc<dyn ConfigClient>, ClientError> {
        if let Some(client) = self.clients.get(coordinate) {
            return Ok(Arc::clone(client.value()));
        }

        match self.clients.entry(coordinate.clone()) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                debug!("为坐标 {} 创建配置客户端", coordinate);
                let client = (self.factory)(endpoint)?;
                vacant.insert(Arc::clone(&client));
                info!(
                    "配置客户端已创建: {} -> {}",
                    coordinate, endpoint.server_address
                );
                Ok(client)
            }
        }
    }

    /// 获取已创建的客户端
    pub fn get(&self, coordinate: &ConfigCoordinate) -> Option<Arc<dyn ConfigClient>> {
        self.clients.get(coordinate).map(|c| Arc::clone(c.value()))
    }

    pub fn contains(&self, coordinate: &ConfigCoordinate) -> bool {
        self.clients.contains_key(coordinate)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
