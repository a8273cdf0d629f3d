//! Nacos Property Source - Nacos 远程配置属性源
//!
//! 把 Nacos 配置中心的远程配置加载为本地只读属性视图，并在远程变更时原地刷新：
//! - 按端点缓存的配置客户端
//! - 带超时的一次性配置拉取
//! - 配置变更订阅
//! - properties/JSON/YAML/TOML 内容解码
//! - 原子替换的属性视图刷新
//! - 结构化日志记录

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod property;
pub mod source;

// 重新导出主要类型
pub use client::{
    ChangeSubscription, ConfigClient, ConfigClientRegistry, ConfigFetcher, InMemoryConfigClient,
    OpenApiConfigClient,
};
pub use config::{AppConfig, NacosClientConfig, PropertySourceConfig};
pub use error::PropertySourceError;
pub use property::{
    CompositePropertySource, LoadedPropertySource, PropertySourceLoader, PropertyView,
    PropertyViewRefresher,
};
pub use source::{ChangeEvent, ChangeKind, ConfigContent, ConfigCoordinate};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
