//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use crate::config::types::NacosClientConfig;
use crate::property::PropertyFormat;
use crate::source::{Charset, ConfigCoordinate};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Nacos 远程配置属性源工具
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nacos-property-source",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "NACOS_PROPERTY_SOURCE_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// 服务端地址，覆盖配置文件中的设置
    #[arg(
        short = 's',
        long,
        value_name = "ADDR",
        help = "服务端地址（多个用逗号分隔）",
        global = true
    )]
    pub server_address: Option<String>,

    /// 日志级别
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        help = "日志级别",
        env = "NACOS_PROPERTY_SOURCE_LOG_LEVEL",
        global = true
    )]
    pub log_level: LogLevel,

    /// 以JSON格式输出日志
    #[arg(long, help = "以JSON格式输出日志", global = true)]
    pub json_logs: bool,

    /// 日志文件路径
    #[arg(long, value_name = "FILE", help = "日志文件路径", global = true)]
    pub log_file: Option<PathBuf>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum LogLevel {
    /// 跟踪级别
    Trace,
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 配置坐标参数
#[derive(ClapArgs, Debug, Clone)]
pub struct CoordinateArgs {
    /// dataId
    #[arg(value_name = "DATA_ID", help = "配置的 dataId")]
    pub data_id: String,

    /// 分组
    #[arg(short, long, default_value = "DEFAULT_GROUP", help = "配置分组")]
    pub group: String,

    /// 命名空间
    #[arg(short, long, default_value = "public", help = "命名空间")]
    pub namespace: String,
}

impl CoordinateArgs {
    pub fn coordinate(&self) -> ConfigCoordinate {
        ConfigCoordinate::new(&self.namespace, &self.group, &self.data_id)
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 读取一个远程配置
    Get {
        #[command(flatten)]
        coordinate: CoordinateArgs,

        /// 解码为键值对输出
        #[arg(short, long, help = "按格式解码后输出键值对")]
        decode: bool,

        /// 内容格式，未指定时按 dataId 扩展名推断
        #[arg(long, value_name = "FORMAT", help = "内容格式")]
        format: Option<PropertyFormat>,

        /// 内容的字符编码
        #[arg(short, long, default_value = "UTF-8", help = "字符编码（UTF-8、US-ASCII、ISO-8859-1）")]
        encoding: Charset,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        output: OutputFormat,
    },

    /// 发布配置
    Publish {
        #[command(flatten)]
        coordinate: CoordinateArgs,

        /// 配置内容
        #[arg(
            value_name = "CONTENT",
            help = "配置内容",
            required_unless_present = "file",
            conflicts_with = "file"
        )]
        content: Option<String>,

        /// 从文件读取配置内容
        #[arg(long, value_name = "FILE", help = "从文件读取配置内容")]
        file: Option<PathBuf>,

        /// 内容类型，未指定时按 dataId 扩展名推断
        #[arg(short = 't', long, value_name = "TYPE", help = "内容类型")]
        content_type: Option<String>,
    },

    /// 删除配置
    Remove {
        #[command(flatten)]
        coordinate: CoordinateArgs,
    },

    /// 加载配置文件中的属性源并持续跟踪远程变更
    Watch {
        /// 每次刷新后打印的属性名（不指定则打印全部）
        #[arg(short, long, value_name = "KEY", help = "关注的属性名")]
        property: Vec<String>,

        /// 运行时长（秒），不指定则直到 Ctrl+C
        #[arg(long, value_name = "SECONDS", help = "运行时长（秒）")]
        duration: Option<u64>,
    },

    /// 验证配置文件
    Validate {
        /// 配置文件路径
        #[arg(value_name = "FILE", help = "配置文件路径")]
        config_path: Option<PathBuf>,

        /// 是否显示详细信息
        #[arg(short, long, help = "显示详细信息")]
        verbose: bool,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
    /// YAML格式
    Yaml,
}

impl Args {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::loader::get_default_config_path)
    }

    /// 应用命令行中的端点覆盖
    pub fn apply_overrides(&self, client: &mut NacosClientConfig) {
        if let Some(server_address) = &self.server_address {
            client.server_address = server_address.clone();
        }
    }

    /// 是否启用详细输出
    pub fn is_verbose(&self) -> bool {
        matches!(self.log_level, LogLevel::Debug | LogLevel::Trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_command() {
        let args = Args::try_parse_from([
            "nacos-property-source",
            "get",
            "test.json",
            "--group",
            "APP",
            "--decode",
        ])
        .unwrap();

        match &args.command {
            Commands::Get {
                coordinate,
                decode,
                encoding,
                ..
            } => {
                let coordinate = coordinate.coordinate();
                assert_eq!(coordinate.data_id(), "test.json");
                assert_eq!(coordinate.group(), "APP");
                assert!(coordinate.is_default_namespace());
                assert!(*decode);
                assert_eq!(*encoding, Charset::Utf8);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_get_encoding_option() {
        let args = Args::try_parse_from([
            "nacos-property-source",
            "get",
            "legacy.properties",
            "--encoding",
            "ISO-8859-1",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Commands::Get {
                encoding: Charset::Latin1,
                ..
            }
        ));

        assert!(Args::try_parse_from([
            "nacos-property-source",
            "get",
            "legacy.properties",
            "--encoding",
            "GBK",
        ])
        .is_err());
    }

    #[test]
    fn test_publish_requires_content_or_file() {
        assert!(Args::try_parse_from(["nacos-property-source", "publish", "test.json"]).is_err());
        assert!(Args::try_parse_from([
            "nacos-property-source",
            "publish",
            "test.json",
            r#"{"my.name":"Mercy Ma"}"#
        ])
        .is_ok());
        assert!(Args::try_parse_from([
            "nacos-property-source",
            "publish",
            "test.json",
            "--file",
            "test.json"
        ])
        .is_ok());
    }

    #[test]
    fn test_global_overrides() {
        let args = Args::try_parse_from([
            "nacos-property-source",
            "remove",
            "test.json",
            "-s",
            "10.0.0.1:8848",
            "--json-logs",
        ])
        .unwrap();

        let mut client = NacosClientConfig::default();
        args.apply_overrides(&mut client);
        assert_eq!(client.server_address, "10.0.0.1:8848");
        assert!(args.json_logs);
        assert!(!args.is_verbose());
    }
}
