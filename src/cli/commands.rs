//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, CoordinateArgs, OutputFormat};
use crate::client::{ConfigClient, ConfigClientRegistry, ConfigFetcher, OpenApiConfigClient};
use crate::config::loader::apply_client_env_overrides;
use crate::config::{AppConfig, ConfigLoader, NacosClientConfig, TomlConfigLoader};
use crate::error::{ConfigError, PropertySourceError, Result};
use crate::logging::LoggingSystem;
use crate::property::{
    decoder_for, LoadedPropertySource, Properties, PropertyFormat, PropertySourceLoader,
    RefreshOutcome,
};
use crate::source::{Charset, FetchOutcome};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 读取应用配置
///
/// 显式指定的配置文件必须存在；使用默认路径且文件不存在时，
/// 以默认配置加环境变量覆盖运行。命令行中的服务端地址优先级最高。
pub async fn load_app_config(args: &Args) -> Result<AppConfig> {
    let path = args.get_config_path();

    let mut config = if path.exists() || args.config.is_some() {
        TomlConfigLoader::new(true).load_from_file(&path).await?
    } else {
        let mut config = AppConfig::default();
        apply_client_env_overrides(&mut config.client, |key| std::env::var(key).ok())?;
        config
    };

    args.apply_overrides(&mut config.client);
    Ok(config)
}

async fn open_api_client(args: &Args) -> Result<(NacosClientConfig, OpenApiConfigClient)> {
    let client_config = load_app_config(args).await?.client;
    let client = OpenApiConfigClient::new(client_config.clone())?;
    Ok((client_config, client))
}

fn print_properties(properties: &Properties, output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(properties)?),
        OutputFormat::Yaml => print!(
            "{}",
            serde_yaml::to_string(properties).map_err(|e| anyhow::anyhow!(e))?
        ),
        OutputFormat::Text => {
            for (key, value) in properties {
                println!("{key}={value}");
            }
        }
    }
    Ok(())
}

/// 读取命令
pub struct GetCommand;

#[async_trait]
impl Command for GetCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Get {
            coordinate,
            decode,
            format,
            encoding,
            output,
        } = &args.command
        {
            self.get(args, coordinate, *decode, *format, *encoding, output)
                .await
        } else {
            Ok(())
        }
    }
}

impl GetCommand {
    async fn get(
        &self,
        args: &Args,
        coordinate_args: &CoordinateArgs,
        decode: bool,
        format: Option<PropertyFormat>,
        charset: Charset,
        output: &OutputFormat,
    ) -> Result<()> {
        let (client_config, client) = open_api_client(args).await?;
        let coordinate = coordinate_args.coordinate();

        let fetcher = ConfigFetcher::new(client_config.request_timeout());
        let content = match fetcher.fetch(&client, &coordinate).await? {
            FetchOutcome::Found(content) => content,
            FetchOutcome::NotFound => {
                return Err(PropertySourceError::ResourceNotFound {
                    key: coordinate.data_id().to_string(),
                    coordinate,
                });
            }
        };

        let text = content.text(charset)?;

        if decode {
            let format =
                format.unwrap_or_else(|| PropertyFormat::from_resource_name(coordinate.data_id()));
            let properties = decoder_for(format).decode(&text)?;
            return print_properties(&properties, output);
        }

        match output {
            OutputFormat::Json => {
                let info = serde_json::json!({
                    "config_id": coordinate.config_id(),
                    "md5": content.md5(),
                    "content_type": content.content_type(),
                    "content": text,
                });
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
            OutputFormat::Yaml => {
                println!("config_id: {}", coordinate.config_id());
                println!("md5: {}", content.md5());
                println!("content: |");
                for line in text.lines() {
                    println!("  {line}");
                }
            }
            OutputFormat::Text => println!("{text}"),
        }

        Ok(())
    }
}

/// 发布命令
pub struct PublishCommand {
    logging: LoggingSystem,
}

impl PublishCommand {
    pub fn new(logging: LoggingSystem) -> Self {
        Self { logging }
    }

    async fn read_content(content: &Option<String>, file: &Option<PathBuf>) -> Result<String> {
        match (content, file) {
            (Some(content), _) => Ok(content.clone()),
            (None, Some(file)) => Ok(tokio::fs::read_to_string(file).await?),
            (None, None) => Err(ConfigError::ValidationError("缺少配置内容".to_string()).into()),
        }
    }
}

#[async_trait]
impl Command for PublishCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Publish {
            coordinate,
            content,
            file,
            content_type,
        } = &args.command
        else {
            return Ok(());
        };

        let (_, client) = open_api_client(args).await?;
        let coordinate = coordinate.coordinate();
        let content = Self::read_content(content, file).await?;
        let content_type = content_type.clone().unwrap_or_else(|| {
            PropertyFormat::from_resource_name(coordinate.data_id())
                .content_type()
                .to_string()
        });

        let published = client
            .publish_config(&coordinate, &content, Some(&content_type))
            .await?;
        self.logging
            .operation_log("publish", &coordinate.config_id(), published);

        if !published {
            return Err(anyhow::anyhow!("服务端拒绝发布配置: {}", coordinate).into());
        }

        println!("✓ 已发布 {} ({} 字节)", coordinate, content.len());
        Ok(())
    }
}

/// 删除命令
pub struct RemoveCommand {
    logging: LoggingSystem,
}

impl RemoveCommand {
    pub fn new(logging: LoggingSystem) -> Self {
        Self { logging }
    }
}

#[async_trait]
impl Command for RemoveCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Remove { coordinate } = &args.command else {
            return Ok(());
        };

        let (_, client) = open_api_client(args).await?;
        let coordinate = coordinate.coordinate();

        let removed = client.remove_config(&coordinate).await?;
        self.logging
            .operation_log("remove", &coordinate.config_id(), removed);

        if removed {
            println!("✓ 已删除 {coordinate}");
        } else {
            println!("✗ 服务端未删除 {coordinate}");
        }
        Ok(())
    }
}

/// 跟踪命令：加载属性源并持续应用远程变更
pub struct WatchCommand {
    logging: LoggingSystem,
}

impl WatchCommand {
    pub fn new(logging: LoggingSystem) -> Self {
        Self { logging }
    }

    fn print_sources(sources: &[LoadedPropertySource], filter: &[String]) {
        for source in sources {
            println!("[{}]", source.name());
            for name in source.composite().property_names() {
                if !filter.is_empty() && !filter.contains(&name) {
                    continue;
                }
                if let Some(value) = source.get_property(&name) {
                    println!("  {name}={value}");
                }
            }
            for key in source.skipped_keys() {
                println!("  (已跳过: {key})");
            }
        }
    }

    async fn watch(&self, args: &Args, filter: &[String], duration: Option<u64>) -> Result<()> {
        let config = load_app_config(args).await?;
        if config.property_sources.is_empty() {
            return Err(ConfigError::ValidationError("配置文件中没有属性源".to_string()).into());
        }

        let registry = Arc::new(ConfigClientRegistry::with_open_api_clients());
        let loader = PropertySourceLoader::new(config.client.clone(), registry);
        let mut reports = loader.refresher().subscribe_reports();

        let sources = loader.load_all(&config).await?;
        Self::print_sources(&sources, filter);

        let deadline = async {
            match duration {
                Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        info!("开始跟踪 {} 个属性源的远程变更", sources.len());

        loop {
            tokio::select! {
                report = reports.recv() => match report {
                    Ok(report) => {
                        self.logging.refresh_log(&report);
                        if report.outcome == Some(RefreshOutcome::Applied) {
                            Self::print_sources(&sources, filter);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("刷新报告积压，跳过 {} 条", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("收到中断信号，停止跟踪");
                    break;
                }
                _ = &mut deadline => break,
            }
        }

        let stats = loader.refresher().stats();
        println!(
            "刷新统计: 已应用 {}，未变化 {}，过期 {}，空内容 {}，忽略删除 {}，失败 {}",
            stats.applied,
            stats.unchanged,
            stats.stale,
            stats.skipped_blank,
            stats.delete_ignored,
            stats.failed
        );

        for source in sources {
            loader.unload(source);
        }
        Ok(())
    }
}

#[async_trait]
impl Command for WatchCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Watch { property, duration } = &args.command {
            self.watch(args, property, *duration).await
        } else {
            Ok(())
        }
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate {
            config_path,
            verbose,
        } = &args.command
        {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());

            self.validate_config_file(&config_file, *verbose).await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(config_path).await?;

        if verbose {
            println!("配置验证通过！");
            println!("客户端配置:");
            println!("  服务端地址: {}", config.client.server_address);
            println!("  请求超时: {}ms", config.client.request_timeout_ms);
            println!("  检测间隔: {}ms", config.client.watch_interval_ms);
            println!(
                "  鉴权: {}",
                if config.client.has_credentials() { "是" } else { "否" }
            );

            println!("属性源:");
            for (i, source) in config.property_sources.iter().enumerate() {
                println!(
                    "  {}. {} -> {} (自动刷新: {}, 忽略不存在: {}, 编码: {})",
                    i + 1,
                    source.name,
                    source.coordinate(),
                    if source.auto_refreshed { "是" } else { "否" },
                    if source.ignore_resource_not_found { "是" } else { "否" },
                    source.encoding
                );
                for key in source.resource_keys() {
                    println!("     {} [{}]", key, source.format_for(&key));
                }
            }
        } else {
            println!("✓ 配置文件验证通过");
            println!("✓ 找到 {} 个属性源", config.property_sources.len());
        }

        Ok(())
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Yaml => {
                    println!("name: {}", crate::APP_NAME);
                    println!("version: {}", crate::VERSION);
                    println!("description: {}", crate::APP_DESCRIPTION);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use clap::Parser;
    use tempfile::NamedTempFile;

    fn args_for(argv: &[&str]) -> Args {
        let mut full = vec!["nacos-property-source"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[tokio::test]
    async fn test_validate_command() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "[[property_sources]]\nkeys = [\"test.json\"]\n",
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = args_for(&["validate", &path, "--verbose"]);
        assert!(ValidateCommand.execute(&args).await.is_ok());
    }

    #[tokio::test]
    async fn test_explicit_config_must_exist() {
        let args = args_for(&["--config", "/nonexistent/nacos.toml", "version"]);
        let err = load_app_config(&args).await.unwrap_err();
        assert!(matches!(
            err,
            PropertySourceError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_line_address_wins() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[client]\nserver_address = \"10.0.0.1:8848\"\n").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = args_for(&["--config", &path, "-s", "10.0.0.2:8848", "version"]);
        let config = load_app_config(&args).await.unwrap();
        assert_eq!(config.client.server_address, "10.0.0.2:8848");
    }

    #[tokio::test]
    async fn test_get_and_publish_against_server() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", "/nacos/v1/cs/configs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"my":{"name":"mercyblitz"}}"#)
            .create_async()
            .await;
        let publish = server
            .mock("POST", "/nacos/v1/cs/configs")
            .match_body(mockito::Matcher::UrlEncoded("type".into(), "json".into()))
            .with_status(200)
            .with_body("true")
            .create_async()
            .await;

        let file = NamedTempFile::new().unwrap();
        let config = format!("[client]\nserver_address = \"{}\"\n", server.host_with_port());
        std::fs::write(file.path(), config).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let args = args_for(&["--config", &path, "get", "test.json", "--decode"]);
        assert!(GetCommand.execute(&args).await.is_ok());

        let args = args_for(&["--config", &path, "publish", "test.json", r#"{"a":"1"}"#]);
        let command = PublishCommand::new(LoggingSystem::new(Default::default()));
        assert!(command.execute(&args).await.is_ok());

        get.assert_async().await;
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_decodes_with_requested_encoding() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/nacos/v1/cs/configs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(b"name=caf\xe9".to_vec())
            .create_async()
            .await;

        let file = NamedTempFile::new().unwrap();
        let config = format!("[client]\nserver_address = \"{}\"\n", server.host_with_port());
        std::fs::write(file.path(), config).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let args = args_for(&["--config", &path, "get", "legacy.properties", "--decode"]);
        assert!(matches!(
            GetCommand.execute(&args).await,
            Err(PropertySourceError::Decode(DecodeError::Charset { .. }))
        ));

        let args = args_for(&[
            "--config",
            &path,
            "get",
            "legacy.properties",
            "--decode",
            "--encoding",
            "ISO-8859-1",
        ]);
        assert!(GetCommand.execute(&args).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_config() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/nacos/v1/cs/configs")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let file = NamedTempFile::new().unwrap();
        let config = format!("[client]\nserver_address = \"{}\"\n", server.host_with_port());
        std::fs::write(file.path(), config).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let args = args_for(&["--config", &path, "get", "missing.json"]);
        assert!(matches!(
            GetCommand.execute(&args).await,
            Err(PropertySourceError::ResourceNotFound { .. })
        ));
    }
}
