//! 属性源加载
//!
//! 组合客户端注册表、拉取器和刷新器：按声明顺序拉取每个资源键，
//! 构建组合属性源，并在初始内容就绪后安装变更订阅

use crate::client::{ConfigClient, ConfigClientRegistry, ConfigFetcher};
use crate::config::{AppConfig, NacosClientConfig, PropertySourceConfig};
use crate::error::{PropertySourceError, Result};
use crate::property::{
    decoder_for, CompositePropertySource, PropertyView, PropertyViewRefresher, ViewState,
};
use crate::source::{Charset, ConfigCoordinate};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 已加载的属性源
#[derive(Debug)]
pub struct LoadedPropertySource {
    composite: Arc<CompositePropertySource>,
    /// 已登记的刷新目标名，见 [`refresh_target`]
    refreshed_views: Vec<String>,
    /// 因不存在或为空而跳过的资源键
    skipped_keys: Vec<String>,
    listeners: Vec<JoinHandle<()>>,
}

impl LoadedPropertySource {
    pub fn name(&self) -> &str {
        self.composite.name()
    }

    pub fn composite(&self) -> &Arc<CompositePropertySource> {
        &self.composite
    }

    pub fn get_property(&self, key: &str) -> Option<String> {
        self.composite.get_property(key)
    }

    pub fn view(&self, name: &str) -> Option<Arc<PropertyView>> {
        self.composite.view(name)
    }

    pub fn skipped_keys(&self) -> &[String] {
        &self.skipped_keys
    }

    pub fn refreshed_views(&self) -> &[String] {
        &self.refreshed_views
    }

    /// 正在运行的变更监听任务数量
    pub fn active_listeners(&self) -> usize {
        self.listeners.iter().filter(|h| !h.is_finished()).count()
    }
}

/// 刷新目标名，由属性源名和资源键组成
///
/// 不同属性源可以声明相同的资源键，各自独立刷新。
pub fn refresh_target(source_name: &str, key: &str) -> String {
    format!("{source_name}/{key}")
}

/// 一个已填充、等待订阅的资源键
struct Populated {
    target: String,
    coordinate: ConfigCoordinate,
    client: Arc<dyn ConfigClient>,
}

/// 属性源加载器
#[derive(Debug)]
pub struct PropertySourceLoader {
    endpoint: NacosClientConfig,
    registry: Arc<ConfigClientRegistry>,
    fetcher: ConfigFetcher,
    refresher: Arc<PropertyViewRefresher>,
}

impl PropertySourceLoader {
    /// 创建加载器，拉取超时取端点配置的请求超时
    pub fn new(endpoint: NacosClientConfig, registry: Arc<ConfigClientRegistry>) -> Self {
        let fetcher = ConfigFetcher::new(endpoint.request_timeout());
        Self {
            endpoint,
            registry,
            fetcher,
            refresher: Arc::new(PropertyViewRefresher::new()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: ConfigFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn registry(&self) -> &Arc<ConfigClientRegistry> {
        &self.registry
    }

    pub fn refresher(&self) -> &Arc<PropertyViewRefresher> {
        &self.refresher
    }

    /// 加载一个属性源
    ///
    /// 每个资源键依次拉取并解码为一个子视图。远程配置不存在或内容为空时，
    /// `ignore_resource_not_found` 为 true 则跳过该键，否则返回错误。
    /// 开启自动刷新时，所有键都填充完成后才安装订阅。
    ///
    /// # 参数
    /// * `source` - 属性源声明
    ///
    /// # 返回
    /// * `Result<LoadedPropertySource>` - 加载结果，拉取和解码失败会向上传递
    pub async fn load(&self, source: &PropertySourceConfig) -> Result<LoadedPropertySource> {
        let charset = source.charset()?;
        let composite = Arc::new(CompositePropertySource::new(&source.name));
        let mut refreshed_views = Vec::new();
        let mut skipped_keys = Vec::new();

        info!(
            "加载属性源: {} (键: {:?}, 自动刷新: {})",
            source.name,
            source.resource_keys(),
            source.auto_refreshed
        );

        let populated = match self
            .populate(
                source,
                charset,
                &composite,
                &mut refreshed_views,
                &mut skipped_keys,
            )
            .await
        {
            Ok(populated) => populated,
            Err(e) => {
                self.unregister_all(&refreshed_views);
                return Err(e);
            }
        };

        let mut listeners = Vec::new();
        if source.auto_refreshed {
            for item in &populated {
                match self.watch(item).await {
                    Ok(listener) => listeners.push(listener),
                    Err(e) => {
                        listeners.iter().for_each(JoinHandle::abort);
                        self.unregister_all(&refreshed_views);
                        return Err(e);
                    }
                }
            }
        }

        info!(
            "属性源 {} 加载完成: {} 个视图，跳过 {} 个键",
            source.name,
            composite.view_count(),
            skipped_keys.len()
        );

        Ok(LoadedPropertySource {
            composite,
            refreshed_views,
            skipped_keys,
            listeners,
        })
    }

    async fn populate(
        &self,
        source: &PropertySourceConfig,
        charset: Charset,
        composite: &CompositePropertySource,
        refreshed_views: &mut Vec<String>,
        skipped_keys: &mut Vec<String>,
    ) -> Result<Vec<Populated>> {
        let mut populated = Vec::new();

        for key in source.resource_keys() {
            let coordinate = source.coordinate();
            let client = self.registry.get_or_create(&self.endpoint, &coordinate)?;

            let outcome = self.fetcher.fetch(client.as_ref(), &coordinate).await?;
            let Some(content) = outcome.into_usable() else {
                if source.ignore_resource_not_found {
                    warn!("远程配置不存在或为空，已忽略: {} (key: {})", coordinate, key);
                    skipped_keys.push(key);
                    continue;
                }
                return Err(PropertySourceError::ResourceNotFound { coordinate, key });
            };

            let format = source.format_for(&key);
            let decoder = decoder_for(format);
            let entries = decoder.decode(&content.text(charset)?)?;
            debug!("{} 解码完成: {} 个属性 ({})", key, entries.len(), format);

            let view = Arc::new(PropertyView::with_state(
                key.clone(),
                ViewState::populated(entries, content.revision(), content.md5()),
            ));

            let target = refresh_target(&source.name, &key);
            if source.auto_refreshed {
                self.refresher
                    .register_as(target.clone(), Arc::clone(&view), decoder, charset)?;
                refreshed_views.push(target.clone());
            }

            composite.add_view(view);
            populated.push(Populated {
                target,
                coordinate,
                client,
            });
        }

        Ok(populated)
    }

    /// 安装订阅并补拉一次
    ///
    /// 初始拉取与订阅之间发生的变更不会产生事件，订阅后再读取一次，
    /// 由刷新器按内容指纹和修订号决定是否替换。
    async fn watch(&self, item: &Populated) -> Result<JoinHandle<()>> {
        let subscription = item.client.subscribe(&item.coordinate)?;
        let listener = self
            .refresher
            .spawn_listener(item.target.clone(), subscription);

        match self.fetcher.fetch(item.client.as_ref(), &item.coordinate).await {
            Ok(outcome) => {
                if let Some(content) = outcome.into_usable() {
                    match self.refresher.refresh(&item.target, &content) {
                        Ok(outcome) => debug!("{} 订阅后补拉: {}", item.target, outcome),
                        Err(e) => warn!("{} 订阅后补拉刷新失败: {}", item.target, e),
                    }
                }
            }
            Err(e) => warn!("{} 订阅后补拉失败: {}", item.target, e),
        }

        Ok(listener)
    }

    /// 按声明顺序加载所有属性源，任一失败时释放已加载的部分
    pub async fn load_all(&self, config: &AppConfig) -> Result<Vec<LoadedPropertySource>> {
        let mut loaded = Vec::with_capacity(config.property_sources.len());

        for source in &config.property_sources {
            match self.load(source).await {
                Ok(source) => loaded.push(source),
                Err(e) => {
                    loaded.into_iter().for_each(|source| self.unload(source));
                    return Err(e);
                }
            }
        }

        Ok(loaded)
    }

    /// 停止属性源的变更监听并取消登记其视图
    pub fn unload(&self, source: LoadedPropertySource) {
        source.listeners.iter().for_each(JoinHandle::abort);
        self.unregister_all(&source.refreshed_views);
        debug!("属性源 {} 已卸载", source.name());
    }

    fn unregister_all(&self, views: &[String]) {
        for view in views {
            self.refresher.unregister(view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryConfigClient;
    use crate::config::DEFAULT_PROPERTY_SOURCE_NAME;
    use crate::error::FetchError;

    fn loader_with(client: &InMemoryConfigClient) -> PropertySourceLoader {
        let registry = ConfigClientRegistry::with_shared_client(Arc::new(client.clone()));
        PropertySourceLoader::new(NacosClientConfig::default(), Arc::new(registry))
    }

    /// 以 `data_id` 为坐标、`keys` 为子属性源的声明
    fn source(data_id: &str, keys: &[&str]) -> PropertySourceConfig {
        PropertySourceConfig {
            data_id: data_id.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    fn target(key: &str) -> String {
        refresh_target(DEFAULT_PROPERTY_SOURCE_NAME, key)
    }

    #[tokio::test]
    async fn test_omitted_data_id_reads_default_coordinate() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(
                &ConfigCoordinate::default(),
                r#"{"my.name":"mercyblitz"}"#,
                None,
            )
            .await
            .unwrap();

        let loader = loader_with(&client);
        let config = PropertySourceConfig {
            keys: vec!["test.json".to_string()],
            ..Default::default()
        };
        let loaded = loader.load(&config).await.unwrap();

        assert_eq!(loaded.get_property("my.name").as_deref(), Some("mercyblitz"));
        assert!(loaded.view("test.json").is_some());
        assert!(loader.registry().contains(&ConfigCoordinate::default()));
    }

    #[tokio::test]
    async fn test_keys_share_the_source_coordinate() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(
                &ConfigCoordinate::for_data_id("app"),
                "my.name: mercyblitz\nmy.age: 18\n",
                None,
            )
            .await
            .unwrap();

        let loader = loader_with(&client);
        let loaded = loader
            .load(&source("app", &["first.yaml", "second.yaml"]))
            .await
            .unwrap();

        assert_eq!(loaded.name(), DEFAULT_PROPERTY_SOURCE_NAME);
        assert_eq!(loaded.composite().view_count(), 2);
        assert_eq!(loaded.get_property("my.name").as_deref(), Some("mercyblitz"));
        assert_eq!(
            loaded.view("second.yaml").unwrap().get_property("my.age").as_deref(),
            Some("18")
        );
        assert_eq!(
            loaded.refreshed_views(),
            [target("first.yaml"), target("second.yaml")]
        );
        assert_eq!(loaded.active_listeners(), 2);
        assert_eq!(loader.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_resource_fails_by_default() {
        let client = InMemoryConfigClient::new();
        let loader = loader_with(&client);

        let err = loader
            .load(&source("missing", &["missing.json"]))
            .await
            .unwrap_err();
        match err {
            PropertySourceError::ResourceNotFound { key, coordinate } => {
                assert_eq!(key, "missing.json");
                assert_eq!(coordinate.data_id(), "missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!loader.refresher().is_registered(&target("missing.json")));
    }

    #[tokio::test]
    async fn test_ignore_resource_not_found_skips_keys() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(&ConfigCoordinate::for_data_id("blank"), "  ", None)
            .await
            .unwrap();

        let loader = loader_with(&client);

        let mut config = source("missing", &["missing.json"]);
        config.ignore_resource_not_found = true;
        let loaded = loader.load(&config).await.unwrap();
        assert_eq!(loaded.skipped_keys(), ["missing.json"]);

        let mut config = source("blank", &["a.json", "b.json"]);
        config.name = "blank-source".to_string();
        config.ignore_resource_not_found = true;
        let loaded = loader.load(&config).await.unwrap();
        assert_eq!(loaded.skipped_keys(), ["a.json", "b.json"]);
        assert_eq!(loaded.composite().view_count(), 0);
        assert_eq!(loaded.active_listeners(), 0);
        assert!(!loader
            .refresher()
            .is_registered(&refresh_target("blank-source", "a.json")));
    }

    #[tokio::test]
    async fn test_decode_failure_rolls_back_registrations() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(&ConfigCoordinate::for_data_id("app"), "a=1", None)
            .await
            .unwrap();

        let loader = loader_with(&client);
        // properties 解码成功，JSON 解码失败
        let err = loader
            .load(&source("app", &["good.properties", "bad.json"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PropertySourceError::Decode(_)));
        assert!(!loader.refresher().is_registered(&target("good.properties")));
    }

    #[tokio::test]
    async fn test_without_auto_refresh_no_subscription() {
        let client = InMemoryConfigClient::new();
        let coordinate = ConfigCoordinate::for_data_id("static.json");
        client
            .publish_config(&coordinate, r#"{"v":"1"}"#, None)
            .await
            .unwrap();

        let loader = loader_with(&client);
        let mut config = source("static.json", &[]);
        config.auto_refreshed = false;
        let loaded = loader.load(&config).await.unwrap();

        client
            .publish_config(&coordinate, r#"{"v":"2"}"#, None)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(loaded.get_property("v").as_deref(), Some("1"));
        assert_eq!(loaded.active_listeners(), 0);
        assert!(!loader.refresher().is_registered(&target("static.json")));
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let registry = ConfigClientRegistry::with_open_api_clients();
        // 端口 1 上没有服务
        let endpoint = NacosClientConfig::with_server_address("127.0.0.1:1");
        let loader = PropertySourceLoader::new(endpoint, Arc::new(registry));

        let err = loader
            .load(&source("test.json", &["test.json"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PropertySourceError::Fetch(FetchError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_unload_allows_reload() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(&ConfigCoordinate::for_data_id("test.json"), "{}", None)
            .await
            .unwrap();

        let loader = loader_with(&client);
        let config = source("test.json", &["test.json"]);
        let loaded = loader.load(&config).await.unwrap();

        assert!(matches!(
            loader.load(&config).await,
            Err(PropertySourceError::Refresh(_))
        ));

        loader.unload(loaded);
        assert!(loader.load(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_sources_may_declare_the_same_key() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(&ConfigCoordinate::for_data_id("a"), r#"{"k":"a"}"#, None)
            .await
            .unwrap();
        client
            .publish_config(&ConfigCoordinate::for_data_id("b"), r#"{"k":"b"}"#, None)
            .await
            .unwrap();

        let loader = loader_with(&client);
        let first = loader
            .load(&PropertySourceConfig {
                name: "first".to_string(),
                ..source("a", &["app.json"])
            })
            .await
            .unwrap();
        let second = loader
            .load(&PropertySourceConfig {
                name: "second".to_string(),
                ..source("b", &["app.json"])
            })
            .await
            .unwrap();

        assert_eq!(first.get_property("k").as_deref(), Some("a"));
        assert_eq!(second.get_property("k").as_deref(), Some("b"));
        assert!(loader
            .refresher()
            .is_registered(&refresh_target("first", "app.json")));
        assert!(loader
            .refresher()
            .is_registered(&refresh_target("second", "app.json")));
    }

    #[tokio::test]
    async fn test_load_all_in_order() {
        let client = InMemoryConfigClient::new();
        client
            .publish_config(&ConfigCoordinate::for_data_id("a.json"), r#"{"k":"a"}"#, None)
            .await
            .unwrap();
        client
            .publish_config(&ConfigCoordinate::for_data_id("b.yaml"), "k: b\n", None)
            .await
            .unwrap();

        let loader = loader_with(&client);
        let config = AppConfig {
            client: NacosClientConfig::default(),
            property_sources: vec![
                PropertySourceConfig {
                    name: "first".to_string(),
                    ..source("a.json", &["a.json"])
                },
                PropertySourceConfig {
                    name: "second".to_string(),
                    ..source("b.yaml", &["b.yaml"])
                },
            ],
        };

        let loaded = loader.load_all(&config).await.unwrap();
        let names: Vec<_> = loaded.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(loaded[1].get_property("k").as_deref(), Some("b"));
    }
}
