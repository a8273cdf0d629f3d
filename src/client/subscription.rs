//! 变更订阅
//!
//! 订阅以消息通道的形式交付 `ChangeEvent`：客户端侧持有发送端，
//! 订阅者持有接收端，同一坐标上的事件按产生顺序送达。

use crate::source::{ChangeEvent, ConfigCoordinate};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// 一次订阅，持有事件接收端
///
/// 丢弃订阅即取消接收；客户端在下一次投递时清理失效的发送端。
#[derive(Debug)]
pub struct ChangeSubscription {
    coordinate: ConfigCoordinate,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// 订阅的坐标
    pub fn coordinate(&self) -> &ConfigCoordinate {
        &self.coordinate
    }

    /// 等待下一个事件；客户端关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// 非阻塞地取出一个已到达的事件
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

/// 按坐标分组的订阅者集合
#[derive(Debug, Default)]
pub struct SubscriberSet {
    senders: DashMap<ConfigCoordinate, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增一个订阅
    ///
    /// # 返回
    /// * `(ChangeSubscription, bool)` - 订阅及是否为该坐标的首个订阅
    pub fn subscribe(&self, coordinate: &ConfigCoordinate) -> (ChangeSubscription, bool) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut entry = self.senders.entry(coordinate.clone()).or_default();
        entry.retain(|s| !s.is_closed());
        let first = entry.is_empty();
        entry.push(sender);
        drop(entry);

        debug!("新增订阅: {} (首个订阅: {})", coordinate, first);

        (
            ChangeSubscription {
                coordinate: coordinate.clone(),
                receiver,
            },
            first,
        )
    }

    /// 向坐标的所有订阅者投递事件
    ///
    /// # 返回
    /// * `usize` - 成功投递的订阅者数量
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let Some(mut entry) = self.senders.get_mut(&event.coordinate) else {
            return 0;
        };

        entry.retain(|sender| sender.send(event.clone()).is_ok());
        entry.len()
    }

    /// 坐标上是否仍有存活的订阅者
    pub fn has_subscribers(&self, coordinate: &ConfigCoordinate) -> bool {
        self.senders
            .get(coordinate)
            .is_some_and(|senders| senders.iter().any(|s| !s.is_closed()))
    }

    /// 清理没有存活订阅者的坐标
    ///
    /// # 返回
    /// * `bool` - 坐标是否已被移除
    pub fn remove_if_idle(&self, coordinate: &ConfigCoordinate) -> bool {
        self.senders
            .remove_if(coordinate, |_, senders| senders.iter().all(|s| s.is_closed()))
            .is_some()
    }

    /// 当前被订阅的坐标数量
    pub fn coordinate_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChangeKind, ConfigContent};

    #[tokio::test]
    async fn test_subscriptions_are_additive() {
        let set = SubscriberSet::new();
        let coordinate = ConfigCoordinate::for_data_id("test.json");

        let (mut first, is_first) = set.subscribe(&coordinate);
        let (mut second, is_second_first) = set.subscribe(&coordinate);
        assert!(is_first);
        assert!(!is_second_first);

        let delivered = set.publish(&ChangeEvent::modified(
            coordinate.clone(),
            ConfigContent::new("a=1", 1),
        ));
        assert_eq!(delivered, 2);

        assert_eq!(first.recv().await.unwrap().kind, ChangeKind::Modified);
        assert_eq!(second.recv().await.unwrap().kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let set = SubscriberSet::new();
        let coordinate = ConfigCoordinate::for_data_id("order.properties");
        let (mut subscription, _) = set.subscribe(&coordinate);

        for revision in 1..=5 {
            set.publish(&ChangeEvent::modified(
                coordinate.clone(),
                ConfigContent::new(format!("v={revision}"), revision),
            ));
        }

        for revision in 1..=5 {
            let event = subscription.recv().await.unwrap();
            assert_eq!(event.content.unwrap().revision(), revision);
        }
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let set = SubscriberSet::new();
        let coordinate = ConfigCoordinate::for_data_id("drop.json");
        let other = ConfigCoordinate::for_data_id("other.json");

        let (subscription, _) = set.subscribe(&coordinate);
        assert!(set.has_subscribers(&coordinate));
        assert!(!set.has_subscribers(&other));
        assert!(!set.remove_if_idle(&coordinate));

        drop(subscription);
        assert!(!set.has_subscribers(&coordinate));
        assert_eq!(set.publish(&ChangeEvent::deleted(coordinate.clone())), 0);
        assert!(set.remove_if_idle(&coordinate));
        assert_eq!(set.coordinate_count(), 0);

        // 重新订阅时再次成为首个订阅
        let (_subscription, first) = set.subscribe(&coordinate);
        assert!(first);
    }
}
