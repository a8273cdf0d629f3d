//! 配置加载器实现
//!
//! 提供TOML配置文件解析、环境变量替换和错误处理功能

use crate::config::types::{validate_config, AppConfig, NacosClientConfig};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};

/// 客户端配置的环境变量覆盖前缀（对应 `microsphere.nacos.client`）
pub const CLIENT_ENV_PREFIX: &str = "MICROSPHERE_NACOS_CLIENT_";

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<AppConfig>` - 加载的配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<AppConfig>;

    /// 从字符串加载配置
    async fn load_from_string(&self, content: &str) -> Result<AppConfig>;

    /// 验证配置
    fn validate(&self, config: &AppConfig) -> Result<()>;
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
    /// 是否应用 `MICROSPHERE_NACOS_CLIENT_*` 环境变量覆盖
    enable_env_overrides: bool,
}

impl TomlConfigLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
            enable_env_overrides: true,
        }
    }

    /// 设置是否应用环境变量覆盖
    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.enable_env_overrides = enabled;
        self
    }

    /// 替换字符串中的 `${VAR_NAME}` 环境变量
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

        let mut result = content.to_string();

        for captures in env_var_regex.captures_iter(content) {
            let full_match = &captures[0];
            let var_name = &captures[1];

            match std::env::var(var_name) {
                Ok(value) => {
                    result = result.replace(full_match, &value);
                }
                Err(_) => {
                    return Err(ConfigError::EnvVarError {
                        var: var_name.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(result)
    }

    /// 解析TOML内容
    fn parse_toml(&self, content: &str) -> Result<AppConfig> {
        let processed_content = self.substitute_env_vars(content)?;

        let mut config: AppConfig = toml::from_str(&processed_content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;

        if self.enable_env_overrides {
            apply_client_env_overrides(&mut config.client, |name| std::env::var(name).ok())?;
        }

        Ok(config)
    }
}

/// 用环境变量覆盖客户端配置
///
/// 变量名为 `MICROSPHERE_NACOS_CLIENT_` 加上大写字段名，例如
/// `MICROSPHERE_NACOS_CLIENT_SERVER_ADDRESS`。
pub fn apply_client_env_overrides<F>(client: &mut NacosClientConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |field: &str| lookup(&format!("{CLIENT_ENV_PREFIX}{field}"));

    if let Some(value) = var("SERVER_ADDRESS") {
        client.server_address = value;
    }
    if let Some(value) = var("CONTEXT_PATH") {
        client.context_path = value;
    }
    if let Some(value) = var("REQUEST_TIMEOUT_MS") {
        client.request_timeout_ms = parse_millis("REQUEST_TIMEOUT_MS", &value)?;
    }
    if let Some(value) = var("WATCH_INTERVAL_MS") {
        client.watch_interval_ms = parse_millis("WATCH_INTERVAL_MS", &value)?;
    }
    if let Some(value) = var("USERNAME") {
        client.username = Some(value);
    }
    if let Some(value) = var("PASSWORD") {
        client.password = Some(value);
    }

    Ok(())
}

fn parse_millis(field: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        ConfigError::ParseError(format!(
            "环境变量 {CLIENT_ENV_PREFIX}{field} 不是有效的毫秒数: {value}"
        ))
        .into()
    })
}

#[async_trait]
impl ConfigLoader for TomlConfigLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<AppConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ParseError(format!("读取文件失败: {}", e)))?;

        let config = self.parse_toml(&content)?;

        self.validate(&config)?;

        log::info!("成功加载配置文件: {}", path.display());
        log::debug!("配置内容: {:?}", config);

        Ok(config)
    }

    async fn load_from_string(&self, content: &str) -> Result<AppConfig> {
        let config = self.parse_toml(content)?;

        self.validate(&config)?;

        log::debug!("成功解析配置字符串");

        Ok(config)
    }

    fn validate(&self, config: &AppConfig) -> Result<()> {
        validate_config(config).map_err(|e| ConfigError::ValidationError(e).into())
    }
}

/// 获取默认配置文件路径
///
/// 当前目录存在 `nacos-property-source.toml` 时优先使用，否则使用用户配置目录。
pub fn get_default_config_path() -> PathBuf {
    let local = PathBuf::from("nacos-property-source.toml");
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|config_dir| config_dir.join("nacos-property-source").join("config.toml"))
        .unwrap_or(local)
}
