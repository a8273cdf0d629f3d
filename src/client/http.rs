//! Nacos Open API 配置客户端
//!
//! 基于 reqwest 访问 Nacos v1 配置接口，支持多地址故障转移、
//! 用户名密码鉴权，并以定时比对内容指纹的方式检测远程变更

use crate::client::{ChangeSubscription, ConfigClient, SubscriberSet};
use crate::config::NacosClientConfig;
use crate::error::{ClientError, FetchError};
use crate::source::{ChangeEvent, ConfigContent, ConfigCoordinate};
use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// 配置接口路径
const CONFIGS_PATH: &str = "/v1/cs/configs";

/// 登录接口路径
const LOGIN_PATH: &str = "/v1/auth/login";

/// 服务端返回的内容指纹响应头
const CONTENT_MD5_HEADER: &str = "Content-MD5";

/// 服务端返回的内容类型响应头
const CONFIG_TYPE_HEADER: &str = "Config-Type";

/// 登录响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    /// 有效期（秒）
    #[serde(default = "default_token_ttl")]
    token_ttl: u64,
}

fn default_token_ttl() -> u64 {
    18000
}

/// 缓存的访问令牌
#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

/// 变更检测基线
#[derive(Debug, Clone, PartialEq, Eq)]
enum Baseline {
    /// 尚未成功读取过
    Unknown,
    /// 最近一次观察到的内容指纹，`None` 表示配置不存在
    Known(Option<String>),
}

/// 比对最新读取结果与基线，产生变更事件
fn detect_change(
    baseline: &mut Baseline,
    coordinate: &ConfigCoordinate,
    current: Option<ConfigContent>,
) -> Option<ChangeEvent> {
    let current_md5 = current.as_ref().map(|c| c.md5().to_string());

    let event = match (&*baseline, current) {
        // 首次读取也投递，订阅前后发生的变更由刷新端按指纹去重
        (Baseline::Unknown, Some(content)) | (Baseline::Known(None), Some(content)) => {
            Some(ChangeEvent::added(coordinate.clone(), content))
        }
        (Baseline::Known(Some(previous)), Some(content)) if previous != content.md5() => {
            Some(ChangeEvent::modified(coordinate.clone(), content))
        }
        (Baseline::Known(Some(_)), None) => Some(ChangeEvent::deleted(coordinate.clone())),
        _ => None,
    };

    *baseline = Baseline::Known(current_md5);
    event
}

struct Inner {
    /// HTTP客户端
    http: Client,
    /// 端点配置
    config: NacosClientConfig,
    /// 服务端基础地址列表
    endpoints: Vec<String>,
    /// 访问令牌缓存
    token: RwLock<Option<AccessToken>>,
    /// 订阅者
    subscribers: SubscriberSet,
    /// 正在检测变更的坐标
    watching: DashSet<ConfigCoordinate>,
    /// 关闭信号
    shutdown: broadcast::Sender<()>,
    /// 最近分配的修订号
    last_revision: AtomicI64,
}

/// Nacos Open API 配置客户端
pub struct OpenApiConfigClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OpenApiConfigClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenApiConfigClient")
            .field("endpoints", &self.inner.endpoints)
            .field("watching", &self.inner.watching.len())
            .finish()
    }
}

impl OpenApiConfigClient {
    /// 创建新的 Open API 客户端
    ///
    /// # 参数
    /// * `config` - 端点配置
    ///
    /// # 返回
    /// * `Result<Self, ClientError>` - 客户端实例
    pub fn new(config: NacosClientConfig) -> Result<Self, ClientError> {
        let endpoints = config.endpoints();
        if endpoints.is_empty() {
            return Err(ClientError::InvalidEndpoint(format!(
                "服务端地址为空: {:?}",
                config.server_address
            )));
        }

        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        let (shutdown, _) = broadcast::channel(1);

        debug!("创建 Open API 客户端，服务端: {:?}", endpoints);

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                endpoints,
                token: RwLock::new(None),
                subscribers: SubscriberSet::new(),
                watching: DashSet::new(),
                shutdown,
                last_revision: AtomicI64::new(0),
            }),
        })
    }

    /// 端点配置
    pub fn config(&self) -> &NacosClientConfig {
        &self.inner.config
    }

    /// 正在检测变更的坐标数量
    pub fn watching_count(&self) -> usize {
        self.inner.watching.len()
    }
}

impl Drop for OpenApiConfigClient {
    fn drop(&mut self) {
        // 没有检测任务时发送失败是正常的
        let _ = self.inner.shutdown.send(());
    }
}

impl Inner {
    /// 分配读取结果的修订号
    ///
    /// 取当前毫秒时间，且严格大于上一次分配的值，系统时钟回拨时仍单调递增。
    fn next_revision(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        match self
            .last_revision
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(last) | Err(last) => now.max(last + 1),
        }
    }

    /// 依次尝试各个服务端地址，连接失败时切换到下一个
    async fn send_with_failover<F>(&self, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let mut last_error = None;

        for base in &self.endpoints {
            match build(base).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    warn!("连接服务端失败，尝试下一个地址: {} - {}", base, e);
                    last_error = Some(e);
                }
                Err(e) if e.is_timeout() => {
                    return Err(FetchError::Timeout {
                        timeout_ms: self.config.request_timeout_ms,
                    });
                }
                Err(e) => return Err(FetchError::Request(e)),
            }
        }

        Err(match last_error {
            Some(e) => FetchError::Request(e),
            None => FetchError::Unavailable(self.config.server_address.clone()),
        })
    }

    /// 获取访问令牌，未配置鉴权时返回 `None`
    async fn access_token(&self) -> Result<Option<String>, FetchError> {
        if !self.config.has_credentials() {
            return Ok(None);
        }

        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(Some(token.token.clone()));
            }
        }

        let mut guard = self.token.write().await;
        // 等待写锁期间可能已被其他任务刷新
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(Some(token.token.clone()));
            }
        }

        let username = self.config.username.clone().unwrap_or_default();
        let password = self.config.password.clone().unwrap_or_default();
        let form = [("username", username), ("password", password)];

        let response = self
            .send_with_failover(|base| self.http.post(format!("{base}{LOGIN_PATH}")).form(&form))
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Unauthorized(body));
        }
        if !status.is_success() {
            return Err(unexpected_status(response).await);
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(format!("登录响应解析失败: {e}")))?;

        // 提前刷新，保留十分之一的有效期作为余量
        let ttl = Duration::from_secs(login.token_ttl.saturating_mul(9) / 10);
        info!("登录成功，令牌有效期 {} 秒", login.token_ttl);

        let token = login.access_token.clone();
        *guard = Some(AccessToken {
            token: login.access_token,
            expires_at: Instant::now() + ttl,
        });

        Ok(Some(token))
    }

    /// 坐标对应的请求参数，默认命名空间不携带 tenant
    async fn coordinate_params(
        &self,
        coordinate: &ConfigCoordinate,
    ) -> Result<Vec<(&'static str, String)>, FetchError> {
        let mut params = vec![
            ("dataId", coordinate.data_id().to_string()),
            ("group", coordinate.group().to_string()),
        ];
        if !coordinate.is_default_namespace() {
            params.push(("tenant", coordinate.namespace_id().to_string()));
        }
        if let Some(token) = self.access_token().await? {
            params.push(("accessToken", token));
        }
        Ok(params)
    }

    async fn get_config(
        &self,
        coordinate: &ConfigCoordinate,
    ) -> Result<Option<ConfigContent>, FetchError> {
        let params = self.coordinate_params(coordinate).await?;

        let response = self
            .send_with_failover(|base| {
                self.http
                    .get(format!("{base}{CONFIGS_PATH}"))
                    .query(&params)
            })
            .await?;

        match response.status() {
            StatusCode::OK => {
                let md5 = header_value(&response, CONTENT_MD5_HEADER);
                let content_type = header_value(&response, CONFIG_TYPE_HEADER);
                let body = response.bytes().await?;

                let mut content = ConfigContent::new(body.to_vec(), self.next_revision());
                if let Some(md5) = md5 {
                    content = content.with_md5(md5);
                }
                if let Some(content_type) = content_type {
                    content = content.with_content_type(content_type);
                }
                Ok(Some(content))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(FetchError::Unauthorized(body))
            }
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn publish_config(
        &self,
        coordinate: &ConfigCoordinate,
        content: &str,
        content_type: Option<&str>,
    ) -> Result<bool, FetchError> {
        let mut form = self.coordinate_params(coordinate).await?;
        form.push(("content", content.to_string()));
        if let Some(content_type) = content_type {
            form.push(("type", content_type.to_string()));
        }

        let response = self
            .send_with_failover(|base| {
                self.http
                    .post(format!("{base}{CONFIGS_PATH}"))
                    .form(&form)
            })
            .await?;

        bool_response(response).await
    }

    async fn remove_config(&self, coordinate: &ConfigCoordinate) -> Result<bool, FetchError> {
        let params = self.coordinate_params(coordinate).await?;

        let response = self
            .send_with_failover(|base| {
                self.http
                    .delete(format!("{base}{CONFIGS_PATH}"))
                    .query(&params)
            })
            .await?;

        bool_response(response).await
    }

    /// 坐标的变更检测任务
    ///
    /// 订阅时先读取一次作为基线，之后按检测间隔比对内容指纹。
    /// 所有订阅者都已释放或客户端被丢弃时退出。
    async fn watch(
        self: Arc<Self>,
        coordinate: ConfigCoordinate,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            "启动配置变更检测: {} (间隔 {}ms)",
            coordinate, self.config.watch_interval_ms
        );

        let mut baseline = Baseline::Unknown;
        let mut ticker = tokio::time::interval(self.config.watch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("客户端已关闭，停止检测: {}", coordinate);
                    self.watching.remove(&coordinate);
                    break;
                }
                _ = ticker.tick() => {}
            }

            // 在 watching 的分片锁内判断，避免与新订阅竞争
            if !self.subscribers.has_subscribers(&coordinate) {
                let removed = self
                    .watching
                    .remove_if(&coordinate, |_| !self.subscribers.has_subscribers(&coordinate));
                if removed.is_some() {
                    debug!("已无订阅者，停止检测: {}", coordinate);
                    break;
                }
            }

            match self.get_config(&coordinate).await {
                Ok(current) => {
                    if let Some(event) = detect_change(&mut baseline, &coordinate, current) {
                        let delivered = self.subscribers.publish(&event);
                        info!(
                            "检测到配置变更: {} {}，通知订阅者 {} 个",
                            event.kind, coordinate, delivered
                        );
                    }
                }
                Err(e) => {
                    error!("检测配置变更失败: {} - {}", coordinate, e);
                }
            }
        }

        self.subscribers.remove_if_idle(&coordinate);
        info!("配置变更检测已停止: {}", coordinate);
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn unexpected_status(response: Response) -> FetchError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    FetchError::UnexpectedStatus { status, body }
}

/// 发布/删除接口返回 `true` 表示成功
async fn bool_response(response: Response) -> Result<bool, FetchError> {
    let status = response.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Unauthorized(body));
    }
    if !status.is_success() {
        return Err(unexpected_status(response).await);
    }

    let body = response.text().await?;
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(FetchError::Malformed(format!("期望 true/false，实际: {other}"))),
    }
}

#[async_trait]
impl ConfigClient for OpenApiConfigClient {
    async fn get_config(
        &self,
        coordinate: &ConfigCoordinate,
    ) -> Result<Option<ConfigContent>, FetchError> {
        self.inner.get_config(coordinate).await
    }

    async fn publish_config(
        &self,
        coordinate: &ConfigCoordinate,
        content: &str,
        content_type: Option<&str>,
    ) -> Result<bool, FetchError> {
        let published = self
            .inner
            .publish_config(coordinate, content, content_type)
            .await?;
        info!("发布配置 {}: {}", coordinate, published);
        Ok(published)
    }

    async fn remove_config(&self, coordinate: &ConfigCoordinate) -> Result<bool, FetchError> {
        let removed = self.inner.remove_config(coordinate).await?;
        info!("删除配置 {}: {}", coordinate, removed);
        Ok(removed)
    }

    fn subscribe(&self, coordinate: &ConfigCoordinate) -> Result<ChangeSubscription, ClientError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        // 先登记订阅者，再决定是否启动检测任务
        let (subscription, _) = self.inner.subscribers.subscribe(coordinate);

        if self.inner.watching.insert(coordinate.clone()) {
            let inner = Arc::clone(&self.inner);
            let shutdown_rx = self.inner.shutdown.subscribe();
            runtime.spawn(inner.watch(coordinate.clone(), shutdown_rx));
        }

        Ok(subscription)
    }
}
