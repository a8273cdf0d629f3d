//! 进程内配置客户端
//!
//! 不依赖服务端的 `ConfigClient` 实现，发布和删除时同步向订阅者投递事件

use crate::client::{ChangeSubscription, ConfigClient, SubscriberSet};
use crate::error::{ClientError, FetchError};
use crate::source::{ChangeEvent, ConfigContent, ConfigCoordinate};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Store {
    configs: DashMap<ConfigCoordinate, ConfigContent>,
    subscribers: SubscriberSet,
    revision: AtomicI64,
}

/// 进程内配置客户端
///
/// 克隆后共享同一份存储。
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigClient {
    store: Arc<Store>,
}

impl InMemoryConfigClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存储的配置数量
    pub fn len(&self) -> usize {
        self.store.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.configs.is_empty()
    }

    fn next_revision(&self) -> i64 {
        self.store.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ConfigClient for InMemoryConfigClient {
    async fn get_config(
        &self,
        coordinate: &ConfigCoordinate,
    ) -> Result<Option<ConfigContent>, FetchError> {
        Ok(self
            .store
            .configs
            .get(coordinate)
            .map(|content| content.value().clone()))
    }

    async fn publish_config(
        &self,
        coordinate: &ConfigCoordinate,
        content: &str,
        content_type: Option<&str>,
    ) -> Result<bool, FetchError> {
        let mut new_content = ConfigContent::new(content, self.next_revision());
        if let Some(content_type) = content_type {
            new_content = new_content.with_content_type(content_type);
        }

        // 持有条目锁期间投递，保证同一坐标的事件顺序与写入顺序一致
        match self.store.configs.entry(coordinate.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().md5() == new_content.md5() {
                    debug!("配置内容未变化，不产生事件: {}", coordinate);
                    return Ok(true);
                }
                occupied.insert(new_content.clone());
                let event = ChangeEvent::modified(coordinate.clone(), new_content);
                let delivered = self.store.subscribers.publish(&event);
                debug!("修改配置 {}，通知订阅者 {} 个", coordinate, delivered);
            }
            Entry::Vacant(vacant) => {
                let _stored = vacant.insert(new_content.clone());
                let event = ChangeEvent::added(coordinate.clone(), new_content);
                let delivered = self.store.subscribers.publish(&event);
                debug!("新增配置 {}，通知订阅者 {} 个", coordinate, delivered);
            }
        }

        Ok(true)
    }

    async fn remove_config(&self, coordinate: &ConfigCoordinate) -> Result<bool, FetchError> {
        match self.store.configs.entry(coordinate.clone()) {
            Entry::Occupied(occupied) => {
                let delivered = self
                    .store
                    .subscribers
                    .publish(&ChangeEvent::deleted(coordinate.clone()));
                occupied.remove();
                debug!("删除配置 {}，通知订阅者 {} 个", coordinate, delivered);
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    fn subscribe(&self, coordinate: &ConfigCoordinate) -> Result<ChangeSubscription, ClientError> {
        let (subscription, _) = self.store.subscribers.subscribe(coordinate);
        Ok(subscription)
    }
}
