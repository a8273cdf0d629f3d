//! 属性视图刷新
//!
//! 将远程内容解码后整体替换到命名视图中。按修订号和内容指纹判定
//! 是否需要替换，解码失败时保留原内容并上报。

use crate::client::ChangeSubscription;
use crate::error::RefreshError;
use crate::property::{PropertyDecoder, PropertyView, ViewState};
use crate::source::{ChangeEvent, ChangeKind, Charset, ConfigContent, ConfigCoordinate};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 刷新报告通道容量
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// 一次刷新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// 已替换视图内容
    Applied,
    /// 内容指纹与当前一致
    Unchanged,
    /// 修订号早于当前内容
    Stale,
    /// 内容为空白
    SkippedBlank,
    /// 删除事件按策略不生效
    DeleteIgnored,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Applied => "applied",
            RefreshOutcome::Unchanged => "unchanged",
            RefreshOutcome::Stale => "stale",
            RefreshOutcome::SkippedBlank => "skipped_blank",
            RefreshOutcome::DeleteIgnored => "delete_ignored",
        }
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次事件处理的报告
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    /// 视图名
    pub view: String,
    /// 事件坐标
    pub coordinate: ConfigCoordinate,
    /// 事件类型
    pub kind: ChangeKind,
    /// 处理结果，失败时为 `None`
    pub outcome: Option<RefreshOutcome>,
    /// 失败原因
    pub error: Option<String>,
    /// 事件内容的修订号
    pub revision: Option<i64>,
    /// 处理时间
    pub timestamp: DateTime<Utc>,
}

impl RefreshReport {
    fn new(
        view: &str,
        event: &ChangeEvent,
        result: &Result<RefreshOutcome, RefreshError>,
    ) -> Self {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(*outcome), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Self {
            view: view.to_string(),
            coordinate: event.coordinate.clone(),
            kind: event.kind,
            outcome,
            error,
            revision: event.content.as_ref().map(ConfigContent::revision),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// 刷新统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub applied: u64,
    pub unchanged: u64,
    pub stale: u64,
    pub skipped_blank: u64,
    pub delete_ignored: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    unchanged: AtomicU64,
    stale: AtomicU64,
    skipped_blank: AtomicU64,
    delete_ignored: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, result: &Result<RefreshOutcome, RefreshError>) {
        let counter = match result {
            Ok(RefreshOutcome::Applied) => &self.applied,
            Ok(RefreshOutcome::Unchanged) => &self.unchanged,
            Ok(RefreshOutcome::Stale) => &self.stale,
            Ok(RefreshOutcome::SkippedBlank) => &self.skipped_blank,
            Ok(RefreshOutcome::DeleteIgnored) => &self.delete_ignored,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RefreshStats {
        RefreshStats {
            applied: self.applied.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            skipped_blank: self.skipped_blank.load(Ordering::Relaxed),
            delete_ignored: self.delete_ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// 刷新目标：视图及其解码方式
#[derive(Clone)]
struct RefreshTarget {
    view: Arc<PropertyView>,
    decoder: Arc<dyn PropertyDecoder>,
    charset: Charset,
}

/// 当前内容与新内容相同或更新时，不需要替换
fn supersedes(current: &ViewState, content: &ConfigContent) -> Option<RefreshOutcome> {
    if current.md5() == Some(content.md5()) {
        return Some(RefreshOutcome::Unchanged);
    }
    match current.revision() {
        Some(revision) if revision > content.revision() => Some(RefreshOutcome::Stale),
        _ => None,
    }
}

/// 属性视图刷新器
pub struct PropertyViewRefresher {
    targets: DashMap<String, RefreshTarget>,
    reports: broadcast::Sender<RefreshReport>,
    counters: Counters,
}

impl fmt::Debug for PropertyViewRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyViewRefresher")
            .field("views", &self.targets.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for PropertyViewRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyViewRefresher {
    pub fn new() -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            targets: DashMap::new(),
            reports,
            counters: Counters::default(),
        }
    }

    /// 以视图名作为登记键登记刷新目标
    pub fn register(
        &self,
        view: Arc<PropertyView>,
        decoder: Arc<dyn PropertyDecoder>,
        charset: Charset,
    ) -> Result<(), RefreshError> {
        let target = view.name().to_string();
        self.register_as(target, view, decoder, charset)
    }

    /// 登记刷新目标
    ///
    /// # 参数
    /// * `target` - 登记键，`refresh`/`spawn_listener` 按此名称查找
    /// * `view` - 属性视图
    /// * `decoder` - 视图内容的解码器
    /// * `charset` - 原始字节的字符编码
    pub fn register_as(
        &self,
        target: impl Into<String>,
        view: Arc<PropertyView>,
        decoder: Arc<dyn PropertyDecoder>,
        charset: Charset,
    ) -> Result<(), RefreshError> {
        let target = target.into();
        match self.targets.entry(target.clone()) {
            Entry::Occupied(_) => Err(RefreshError::DuplicateView(target)),
            Entry::Vacant(vacant) => {
                debug!(
                    "登记刷新目标: {} -> {} ({}, {})",
                    target,
                    view.name(),
                    decoder.format(),
                    charset
                );
                vacant.insert(RefreshTarget {
                    view,
                    decoder,
                    charset,
                });
                Ok(())
            }
        }
    }

    /// 取消登记
    pub fn unregister(&self, view_name: &str) -> bool {
        self.targets.remove(view_name).is_some()
    }

    pub fn is_registered(&self, view_name: &str) -> bool {
        self.targets.contains_key(view_name)
    }

    /// 已登记的视图
    pub fn view(&self, view_name: &str) -> Option<Arc<PropertyView>> {
        self.targets
            .get(view_name)
            .map(|target| Arc::clone(&target.view))
    }

    fn target(&self, view_name: &str) -> Result<RefreshTarget, RefreshError> {
        self.targets
            .get(view_name)
            .map(|target| target.value().clone())
            .ok_or_else(|| RefreshError::UnknownView(view_name.to_string()))
    }

    /// 用新内容刷新视图
    ///
    /// # 参数
    /// * `view_name` - 视图名
    /// * `content` - 新内容
    ///
    /// # 返回
    /// * `Ok(RefreshOutcome)` - 已替换或无需替换
    /// * `Err(RefreshError)` - 视图未登记或解码失败（视图保持原内容）
    pub fn refresh(
        &self,
        view_name: &str,
        content: &ConfigContent,
    ) -> Result<RefreshOutcome, RefreshError> {
        let result = self.apply(view_name, content);
        self.counters.record(&result);
        result
    }

    fn apply(&self, view_name: &str, content: &ConfigContent) -> Result<RefreshOutcome, RefreshError> {
        let target = self.target(view_name)?;

        if content.is_blank() {
            return Ok(RefreshOutcome::SkippedBlank);
        }

        // 先判断一次，避免对重复内容做无用的解码
        if let Some(outcome) = supersedes(&target.view.snapshot(), content) {
            return Ok(outcome);
        }

        let decode_error = |source| RefreshError::Decode {
            view: view_name.to_string(),
            source,
        };
        let text = content.text(target.charset).map_err(decode_error)?;
        let entries = target.decoder.decode(&text).map_err(decode_error)?;

        let next = Arc::new(ViewState::populated(
            entries,
            content.revision(),
            content.md5(),
        ));

        let mut outcome = RefreshOutcome::Applied;
        target.view.update(|current| match supersedes(current, content) {
            Some(skipped) => {
                outcome = skipped;
                Arc::clone(current)
            }
            None => {
                outcome = RefreshOutcome::Applied;
                Arc::clone(&next)
            }
        });

        Ok(outcome)
    }

    /// 处理一个变更事件
    ///
    /// 删除事件不修改视图；没有可用内容的新增/修改事件视为空白内容。
    pub fn handle_event(
        &self,
        view_name: &str,
        event: &ChangeEvent,
    ) -> Result<RefreshOutcome, RefreshError> {
        let result = match (event.kind, &event.content) {
            (ChangeKind::Deleted, _) => {
                if self.is_registered(view_name) {
                    Ok(RefreshOutcome::DeleteIgnored)
                } else {
                    Err(RefreshError::UnknownView(view_name.to_string()))
                }
            }
            (_, Some(content)) => self.apply(view_name, content),
            (_, None) => Ok(RefreshOutcome::SkippedBlank),
        };
        self.counters.record(&result);
        result
    }

    /// 订阅刷新报告
    pub fn subscribe_reports(&self) -> broadcast::Receiver<RefreshReport> {
        self.reports.subscribe()
    }

    /// 刷新统计
    pub fn stats(&self) -> RefreshStats {
        self.counters.snapshot()
    }

    /// 在后台任务中消费订阅事件并刷新视图
    ///
    /// 每个事件的处理结果都会写日志并广播一份 `RefreshReport`。
    /// 订阅关闭或视图被取消登记后任务退出。
    pub fn spawn_listener(
        self: &Arc<Self>,
        view_name: impl Into<String>,
        mut subscription: ChangeSubscription,
    ) -> JoinHandle<()> {
        let refresher = Arc::clone(self);
        let view_name = view_name.into();

        tokio::spawn(async move {
            debug!(
                "开始监听视图 {} 的变更: {}",
                view_name,
                subscription.coordinate()
            );

            while let Some(event) = subscription.recv().await {
                let result = refresher.handle_event(&view_name, &event);

                match &result {
                    Ok(RefreshOutcome::Applied) => {
                        info!("视图 {} 已刷新: {}", view_name, event.coordinate)
                    }
                    Ok(RefreshOutcome::DeleteIgnored) => warn!(
                        "远程配置已删除，视图 {} 保持原内容: {}",
                        view_name, event.coordinate
                    ),
                    Ok(outcome) => debug!("视图 {} 未刷新 ({}): {}", view_name, outcome, event.coordinate),
                    Err(e) => error!("视图 {} 刷新失败: {}", view_name, e),
                }

                let stop = matches!(result, Err(RefreshError::UnknownView(_)));
                // 没有报告订阅者时发送失败是正常的
                let _ = refresher
                    .reports
                    .send(RefreshReport::new(&view_name, &event, &result));

                if stop {
                    break;
                }
            }

            debug!("视图 {} 的变更监听已结束", view_name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ConfigClient, InMemoryConfigClient};
    use crate::property::{decoder_for, PropertyFormat};
    use std::time::Duration;

    fn json_refresher(view_name: &str) -> (PropertyViewRefresher, Arc<PropertyView>) {
        let refresher = PropertyViewRefresher::new();
        let view = Arc::new(PropertyView::new(view_name));
        refresher
            .register(
                Arc::clone(&view),
                decoder_for(PropertyFormat::Json),
                Charset::Utf8,
            )
            .unwrap();
        (refresher, view)
    }

    #[test]
    fn test_refresh_applies_content() {
        let (refresher, view) = json_refresher("test.json");
        let content = ConfigContent::new(r#"{"my.name":"mercyblitz"}"#, 1);

        assert_eq!(
            refresher.refresh("test.json", &content).unwrap(),
            RefreshOutcome::Applied
        );
        assert_eq!(view.get_property("my.name").as_deref(), Some("mercyblitz"));
        assert_eq!(view.snapshot().md5(), Some(content.md5()));
    }

    #[test]
    fn test_same_content_is_idempotent() {
        let (refresher, view) = json_refresher("test.json");
        let event = ChangeEvent::modified(
            ConfigCoordinate::for_data_id("test.json"),
            ConfigContent::new(r#"{"my.name":"Mercy Ma"}"#, 2),
        );

        assert_eq!(
            refresher.handle_event("test.json", &event).unwrap(),
            RefreshOutcome::Applied
        );
        let once = view.snapshot();
        assert_eq!(
            refresher.handle_event("test.json", &event).unwrap(),
            RefreshOutcome::Unchanged
        );
        assert_eq!(view.snapshot().entries(), once.entries());
    }

    #[test]
    fn test_stale_revision_is_ignored() {
        let (refresher, view) = json_refresher("test.json");
        refresher
            .refresh("test.json", &ConfigContent::new(r#"{"v":"new"}"#, 10))
            .unwrap();

        let outcome = refresher
            .refresh("test.json", &ConfigContent::new(r#"{"v":"old"}"#, 5))
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Stale);
        assert_eq!(view.get_property("v").as_deref(), Some("new"));
    }

    #[test]
    fn test_delete_never_clears_view() {
        let (refresher, view) = json_refresher("test.json");
        refresher
            .refresh("test.json", &ConfigContent::new(r#"{"my.name":"mercyblitz"}"#, 1))
            .unwrap();

        let event = ChangeEvent::deleted(ConfigCoordinate::for_data_id("test.json"));
        assert_eq!(
            refresher.handle_event("test.json", &event).unwrap(),
            RefreshOutcome::DeleteIgnored
        );
        assert_eq!(view.get_property("my.name").as_deref(), Some("mercyblitz"));
    }

    #[test]
    fn test_blank_content_is_skipped() {
        let (refresher, view) = json_refresher("test.json");
        refresher
            .refresh("test.json", &ConfigContent::new(r#"{"a":"1"}"#, 1))
            .unwrap();

        let outcome = refresher
            .refresh("test.json", &ConfigContent::new("  \n", 2))
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::SkippedBlank);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_decode_failure_keeps_previous_state() {
        let (refresher, view) = json_refresher("test.json");
        refresher
            .refresh("test.json", &ConfigContent::new(r#"{"my.name":"mercyblitz"}"#, 1))
            .unwrap();
        let before = view.snapshot();

        let err = refresher
            .refresh("test.json", &ConfigContent::new("{broken", 2))
            .unwrap_err();
        assert!(matches!(err, RefreshError::Decode { ref view, .. } if view == "test.json"));
        assert_eq!(view.snapshot(), before);

        let stats = refresher.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_charset_failure_is_decode_error() {
        let refresher = PropertyViewRefresher::new();
        let view = Arc::new(PropertyView::new("ascii.properties"));
        refresher
            .register(
                Arc::clone(&view),
                decoder_for(PropertyFormat::Properties),
                Charset::Ascii,
            )
            .unwrap();

        let result = refresher.refresh(
            "ascii.properties",
            &ConfigContent::new("name=名字".as_bytes().to_vec(), 1),
        );
        assert!(matches!(result, Err(RefreshError::Decode { .. })));
        assert!(view.is_empty());
    }

    #[test]
    fn test_register_rejects_duplicates_and_unknown_views() {
        let (refresher, _) = json_refresher("test.json");
        let duplicate = refresher.register(
            Arc::new(PropertyView::new("test.json")),
            decoder_for(PropertyFormat::Json),
            Charset::Utf8,
        );
        assert_eq!(
            duplicate,
            Err(RefreshError::DuplicateView("test.json".to_string()))
        );

        let unknown = refresher.refresh("other.json", &ConfigContent::new("{}", 1));
        assert_eq!(
            unknown,
            Err(RefreshError::UnknownView("other.json".to_string()))
        );

        assert!(refresher.unregister("test.json"));
        assert!(!refresher.is_registered("test.json"));
    }

    #[tokio::test]
    async fn test_listener_refreshes_and_reports() {
        let refresher = Arc::new(PropertyViewRefresher::new());
        let view = Arc::new(PropertyView::new("test.json"));
        refresher
            .register(
                Arc::clone(&view),
                decoder_for(PropertyFormat::Json),
                Charset::Utf8,
            )
            .unwrap();

        let client = InMemoryConfigClient::new();
        let coordinate = ConfigCoordinate::for_data_id("test.json");
        let mut reports = refresher.subscribe_reports();
        let _listener = refresher.spawn_listener("test.json", client.subscribe(&coordinate).unwrap());

        client
            .publish_config(&coordinate, r#"{"my.name":"Mercy Ma"}"#, None)
            .await
            .unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.outcome, Some(RefreshOutcome::Applied));
        assert_eq!(report.kind, ChangeKind::Added);
        assert_eq!(view.get_property("my.name").as_deref(), Some("Mercy Ma"));

        client.publish_config(&coordinate, "{oops", None).await.unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!report.is_success());
        assert!(report.error.is_some());
        assert_eq!(view.get_property("my.name").as_deref(), Some("Mercy Ma"));
    }
}
