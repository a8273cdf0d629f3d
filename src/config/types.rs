//! 配置数据结构定义
//!
//! 定义客户端端点配置、属性源声明和验证逻辑

use crate::property::PropertyFormat;
use crate::source::{
    Charset, ConfigCoordinate, DEFAULT_DATA_ID, DEFAULT_GROUP_NAME, DEFAULT_NAMESPACE_ID,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// 默认属性源名称
pub const DEFAULT_PROPERTY_SOURCE_NAME: &str = "defaultNacosPropertySource";

/// 主配置结构，包含客户端配置和属性源列表
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Nacos 客户端端点配置
    #[serde(default)]
    pub client: NacosClientConfig,
    /// 属性源声明列表
    #[serde(default)]
    pub property_sources: Vec<PropertySourceConfig>,
}

/// Nacos 客户端端点配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NacosClientConfig {
    /// 服务端地址，多个地址用逗号分隔
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// 服务端上下文路径
    #[serde(default = "default_context_path")]
    pub context_path: String,
    /// 单次请求超时时间（毫秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// 变更检测间隔（毫秒）
    #[serde(default = "default_watch_interval")]
    pub watch_interval_ms: u64,
    /// 用户名（可选，开启鉴权时使用）
    pub username: Option<String>,
    /// 密码（可选）
    pub password: Option<String>,
}

impl Default for NacosClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            context_path: default_context_path(),
            request_timeout_ms: default_request_timeout(),
            watch_interval_ms: default_watch_interval(),
            username: None,
            password: None,
        }
    }
}

impl NacosClientConfig {
    /// 指定服务端地址创建
    pub fn with_server_address(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    /// 解析出所有服务端基础地址（含上下文路径）
    pub fn endpoints(&self) -> Vec<String> {
        let context_path = self.context_path.trim().trim_end_matches('/');
        let context_path = if context_path.is_empty() || context_path.starts_with('/') {
            context_path.to_string()
        } else {
            format!("/{context_path}")
        };

        self.server_address
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(|address| {
                let address = address.trim_end_matches('/');
                if address.starts_with("http://") || address.starts_with("https://") {
                    format!("{address}{context_path}")
                } else {
                    format!("http://{address}{context_path}")
                }
            })
            .collect()
    }

    /// 是否配置了鉴权信息
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// 属性源声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertySourceConfig {
    /// 属性源名称
    #[serde(default = "default_source_name")]
    pub name: String,
    /// 远程变更时是否自动刷新
    #[serde(default = "default_auto_refreshed")]
    pub auto_refreshed: bool,
    /// 资源键列表，每个键对应一个子属性源，按声明顺序加入
    #[serde(default)]
    pub keys: Vec<String>,
    /// 远程配置不存在时是否忽略
    #[serde(default)]
    pub ignore_resource_not_found: bool,
    /// 字符编码
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// 命名空间
    #[serde(default = "default_namespace_id")]
    pub namespace_id: String,
    /// 分组
    #[serde(default = "default_group")]
    pub group: String,
    /// dataId，所有资源键读取同一坐标
    #[serde(default = "default_data_id")]
    pub data_id: String,
    /// 内容格式，未配置时按资源键扩展名推断
    pub format: Option<PropertyFormat>,
}

impl Default for PropertySourceConfig {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            auto_refreshed: default_auto_refreshed(),
            keys: Vec::new(),
            ignore_resource_not_found: false,
            encoding: default_encoding(),
            namespace_id: default_namespace_id(),
            group: default_group(),
            data_id: default_data_id(),
            format: None,
        }
    }
}

impl PropertySourceConfig {
    /// 资源键列表；未声明任何键时以 dataId 作为唯一键
    pub fn resource_keys(&self) -> Vec<String> {
        if self.keys.is_empty() {
            vec![self.data_id.clone()]
        } else {
            self.keys.clone()
        }
    }

    /// 属性源读取的配置坐标
    ///
    /// 资源键只用于命名子属性源和推断内容格式，不参与坐标。
    pub fn coordinate(&self) -> ConfigCoordinate {
        ConfigCoordinate::new(&self.namespace_id, &self.group, &self.data_id)
    }

    /// 资源键对应的内容格式
    pub fn format_for(&self, key: &str) -> PropertyFormat {
        self.format
            .unwrap_or_else(|| PropertyFormat::from_resource_name(key))
    }

    /// 解析字符编码
    pub fn charset(&self) -> Result<Charset, crate::error::ConfigError> {
        self.encoding.parse()
    }
}

// 默认值函数
fn default_server_address() -> String {
    "127.0.0.1:8848".to_string()
}
fn default_context_path() -> String {
    "/nacos".to_string()
}
fn default_request_timeout() -> u64 {
    3000
}
fn default_watch_interval() -> u64 {
    3000
}
fn default_source_name() -> String {
    DEFAULT_PROPERTY_SOURCE_NAME.to_string()
}
fn default_auto_refreshed() -> bool {
    true
}
fn default_encoding() -> String {
    "UTF-8".to_string()
}
fn default_namespace_id() -> String {
    DEFAULT_NAMESPACE_ID.to_string()
}
fn default_group() -> String {
    DEFAULT_GROUP_NAME.to_string()
}
fn default_data_id() -> String {
    DEFAULT_DATA_ID.to_string()
}

/// 验证客户端端点配置
pub fn validate_client_config(client: &NacosClientConfig) -> Result<(), String> {
    if client.endpoints().is_empty() {
        return Err("服务端地址不能为空".to_string());
    }

    if client.request_timeout_ms == 0 {
        return Err("请求超时时间不能为0".to_string());
    }

    if client.watch_interval_ms == 0 {
        return Err("变更检测间隔不能为0".to_string());
    }

    if client.has_credentials() && client.password.is_none() {
        return Err("配置了用户名但缺少密码".to_string());
    }

    Ok(())
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &AppConfig) -> Result<(), String> {
    validate_client_config(&config.client)?;

    let mut source_names = HashSet::new();

    for source in &config.property_sources {
        if source.name.trim().is_empty() {
            return Err("属性源名称不能为空".to_string());
        }

        if !source_names.insert(source.name.as_str()) {
            return Err(format!("属性源名称重复: {}", source.name));
        }

        if let Err(e) = source.charset() {
            return Err(format!("属性源 {} 的{}", source.name, e));
        }

        let keys = source.resource_keys();
        let mut local_keys = HashSet::new();
        for key in &keys {
            if key.trim().is_empty() {
                return Err(format!("属性源 {} 存在空的资源键", source.name));
            }
            if !local_keys.insert(key.as_str()) {
                return Err(format!("属性源 {} 的资源键重复: {}", source.name, key));
            }
        }
    }

    Ok(())
}
