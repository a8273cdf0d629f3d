//! 错误处理模块
//!
//! 定义配置源子系统的统一错误类型

use crate::source::ConfigCoordinate;
use thiserror::Error;

/// 属性源子系统的主要错误类型
#[derive(Error, Debug)]
pub enum PropertySourceError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 远程读取失败
    #[error("配置拉取失败: {0}")]
    Fetch(#[from] FetchError),

    /// 客户端创建或订阅失败
    #[error("客户端错误: {0}")]
    Client(#[from] ClientError),

    /// 内容解码失败
    #[error("配置解码失败: {0}")]
    Decode(#[from] DecodeError),

    /// 刷新失败
    #[error("属性刷新失败: {0}")]
    Refresh(#[from] RefreshError),

    /// 远程配置不存在或内容为空，且未配置忽略
    #[error("远程配置不存在或内容为空: {coordinate} (key: {key})")]
    ResourceNotFound {
        coordinate: ConfigCoordinate,
        key: String,
    },

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },

    /// 不支持的字符编码
    #[error("不支持的字符编码: {0}")]
    UnsupportedCharset(String),
}

/// 远程读取错误（传输层/协议层失败，与“配置不存在”区分）
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP请求错误
    #[error("HTTP请求失败: {0}")]
    Request(#[from] reqwest::Error),

    /// 超时错误
    #[error("请求超时: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// 非预期的响应状态码
    #[error("非预期的响应状态码 {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// 响应格式错误
    #[error("响应格式错误: {0}")]
    Malformed(String),

    /// 认证失败
    #[error("认证失败: {0}")]
    Unauthorized(String),

    /// 没有可用的服务端地址
    #[error("没有可用的服务端地址: {0}")]
    Unavailable(String),
}

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP客户端构建失败
    #[error("HTTP客户端构建失败: {0}")]
    Build(#[from] reqwest::Error),

    /// 端点配置无效
    #[error("端点配置无效: {0}")]
    InvalidEndpoint(String),

    /// 订阅需要在 tokio 运行时内进行
    #[error("当前线程没有可用的 tokio 运行时，无法启动订阅任务")]
    NoRuntime,
}

/// 解码错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 字符编码转换失败
    #[error("按 {charset} 解码失败: {reason}")]
    Charset { charset: String, reason: String },

    /// 内容语法错误
    #[error("{format} 内容语法错误: {reason}")]
    Syntax { format: String, reason: String },

    /// 根节点不是键值映射
    #[error("{format} 内容的根节点必须是键值映射")]
    NotAMap { format: String },
}

/// 刷新错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// 属性视图未注册
    #[error("属性视图未注册: {0}")]
    UnknownView(String),

    /// 同名属性视图已注册
    #[error("属性视图已注册: {0}")]
    DuplicateView(String),

    /// 解码失败，视图保持原内容
    #[error("视图 {view} 解码失败，保留原内容: {source}")]
    Decode {
        view: String,
        #[source]
        source: DecodeError,
    },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, PropertySourceError>;
