//! 配置客户端模块
//!
//! 定义远程配置客户端接口，提供 Nacos Open API 客户端、进程内客户端、
//! 客户端缓存、一次性拉取和变更订阅功能

pub mod fetcher;
pub mod http;
pub mod memory;
pub mod registry;
pub mod subscription;

use crate::error::{ClientError, FetchError};
use crate::source::{ConfigContent, ConfigCoordinate};
use async_trait::async_trait;

// 重新导出主要类型
pub use fetcher::ConfigFetcher;
pub use http::OpenApiConfigClient;
pub use memory::InMemoryConfigClient;
pub use registry::{ClientFactory, ConfigClientRegistry};
pub use subscription::{ChangeSubscription, SubscriberSet};

/// 远程配置客户端trait
///
/// 一个客户端实例持有访问某个服务端所需的网络/会话状态，
/// 生命周期与进程相同，可在多个线程间共享。
#[async_trait]
pub trait ConfigClient: Send + Sync {
    /// 读取坐标下的配置
    ///
    /// # 返回
    /// * `Ok(None)` - 坐标下没有配置
    /// * `Err(FetchError)` - 传输层或协议层失败
    async fn get_config(
        &self,
        coordinate: &ConfigCoordinate,
    ) -> Result<Option<ConfigContent>, FetchError>;

    /// 发布配置
    ///
    /// # 参数
    /// * `coordinate` - 配置坐标
    /// * `content` - 配置内容
    /// * `content_type` - 内容类型（json、properties、yaml、text ...）
    async fn publish_config(
        &self,
        coordinate: &ConfigCoordinate,
        content: &str,
        content_type: Option<&str>,
    ) -> Result<bool, FetchError>;

    /// 删除配置
    async fn remove_config(&self, coordinate: &ConfigCoordinate) -> Result<bool, FetchError>;

    /// 订阅坐标的变更
    ///
    /// 立即返回，事件在客户端管理的任务中异步投递。
    /// 同一坐标上的多个订阅互不影响，各自收到全部事件。
    fn subscribe(&self, coordinate: &ConfigCoordinate) -> Result<ChangeSubscription, ClientError>;
}
