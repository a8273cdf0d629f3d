//! 日志系统模块
//!
//! 提供结构化日志配置和刷新审计日志

use crate::property::RefreshReport;
use log::LevelFilter;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化结果
    init_result: Result<(), String>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

impl Default for GlobalLoggingState {
    fn default() -> Self {
        Self {
            initialized: false,
            init_result: Ok(()),
            current_config: None,
        }
    }
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

fn lock_state(state: &Mutex<GlobalLoggingState>) -> MutexGuard<'_, GlobalLoggingState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

/// 日志系统管理器
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    /// 配置
    config: LogConfig,
}

impl LoggingSystem {
    /// 创建新的日志系统（不做全局初始化）
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 初始化日志系统
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `Result<LoggingSystem, anyhow::Error>` - 初始化结果
    ///
    /// 全局 subscriber 只安装一次，重复调用返回新的 `LoggingSystem` 实例。
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        Self::setup_logging_with_options(config, false)
    }

    /// 初始化日志系统（带选项）
    ///
    /// # 参数
    /// * `config` - 日志配置
    /// * `force_reinit` - 是否强制重新初始化（主要用于测试）
    pub fn setup_logging_with_options(
        config: LogConfig,
        force_reinit: bool,
    ) -> anyhow::Result<Self> {
        let state_mutex =
            GLOBAL_LOGGING_STATE.get_or_init(|| Mutex::new(GlobalLoggingState::default()));

        {
            let state = lock_state(state_mutex);
            if state.initialized && !force_reinit {
                return match &state.init_result {
                    Ok(()) => Ok(Self::new(config)),
                    Err(e) => Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e)),
                };
            }
        }

        let init_result = Self::perform_initialization(&config);

        {
            let mut state = lock_state(state_mutex);
            state.initialized = true;
            state.current_config = Some(config.clone());
            state.init_result = init_result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        }

        init_result?;
        Ok(Self::new(config))
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        // log crate 到 tracing 的桥接
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)?;
        Ok(())
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 构建环境过滤器
    fn build_env_filter(config: &LogConfig) -> EnvFilter {
        let mut env_filter = EnvFilter::from_default_env()
            .add_directive(Self::convert_level_to_directive(config.level));

        for (module, level) in &config.module_levels {
            match format!("{}={}", module, Self::level_to_string(*level)).parse::<Directive>() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => eprintln!("忽略无效的模块日志级别 {module}: {e}"),
            }
        }

        env_filter
    }

    /// 初始化 tracing subscriber
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let env_filter = Self::build_env_filter(config);

        let fmt_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            fmt::layer()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_ansi(true)
                .with_target(true)
                .with_thread_names(true)
                .boxed()
        };

        let result = match (&config.file_path, config.console) {
            (Some(file_path), false) => {
                let file = std::fs::File::create(file_path)
                    .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_file(true)
                    .with_line_number(true);

                registry().with(env_filter).with(file_layer).try_init()
            }
            _ => registry().with(env_filter).with(fmt_layer).try_init(),
        };

        match result {
            Ok(()) => {
                tracing::info!("日志系统初始化完成");
                tracing::debug!("日志配置: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains(
                    "attempted to set a logger after the logging system was already initialized",
                ) || error_msg.contains("a global default trace dispatcher has already been set")
                {
                    // 已经初始化过了
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "tracing subscriber初始化失败: {}",
                        error_msg
                    ))
                }
            }
        }
    }

    /// 将 log::LevelFilter 转换为 tracing 的指令
    fn convert_level_to_directive(level: LevelFilter) -> Directive {
        use tracing_subscriber::filter::LevelFilter as TracingLevel;
        match level {
            LevelFilter::Off => Directive::from(TracingLevel::OFF),
            LevelFilter::Error => Directive::from(tracing::Level::ERROR),
            LevelFilter::Warn => Directive::from(tracing::Level::WARN),
            LevelFilter::Info => Directive::from(tracing::Level::INFO),
            LevelFilter::Debug => Directive::from(tracing::Level::DEBUG),
            LevelFilter::Trace => Directive::from(tracing::Level::TRACE),
        }
    }

    /// 将 log::LevelFilter 转换为字符串
    fn level_to_string(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        }
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .is_some_and(|state| lock_state(state).initialized)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| lock_state(state).current_config.clone())
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        if let Some(state_mutex) = GLOBAL_LOGGING_STATE.get() {
            let mut state = lock_state(state_mutex);
            state.initialized = false;
            state.init_result = Ok(());
            state.current_config = None;
        }
    }

    /// 刷新审计日志的 JSON 结构
    pub fn refresh_entry(report: &RefreshReport) -> serde_json::Value {
        json!({
            "timestamp": report.timestamp.to_rfc3339(),
            "type": "refresh",
            "view": report.view,
            "config_id": report.coordinate.config_id(),
            "event": report.kind.to_string(),
            "outcome": report.outcome.map(|o| o.as_str()),
            "revision": report.revision,
            "error": report.error.as_deref().unwrap_or(""),
        })
    }

    /// 记录一次视图刷新
    pub fn refresh_log(&self, report: &RefreshReport) {
        if self.config.json_format {
            let entry = Self::refresh_entry(report);
            if report.is_success() {
                tracing::info!("{entry}");
            } else {
                tracing::error!("{entry}");
            }
            return;
        }

        match (&report.outcome, &report.error) {
            (Some(outcome), _) => tracing::info!(
                "REFRESH: {} <- {} {} - {}",
                report.view,
                report.kind,
                report.coordinate,
                outcome
            ),
            (None, error) => tracing::error!(
                "REFRESH: {} <- {} {} - FAILED ({})",
                report.view,
                report.kind,
                report.coordinate,
                error.as_deref().unwrap_or("")
            ),
        }
    }

    /// 记录发布/删除等远程写操作
    pub fn operation_log(&self, operation: &str, config_id: &str, success: bool) {
        let entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "type": "operation",
            "operation": operation,
            "config_id": config_id,
            "success": success,
        });

        if self.config.json_format {
            tracing::info!("{entry}");
        } else {
            tracing::info!(
                "OPERATION: {} {} - {}",
                operation,
                config_id,
                if success { "SUCCESS" } else { "FAILED" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshError;
    use crate::property::{PropertyFormat, PropertyView, PropertyViewRefresher};
    use crate::source::{ChangeEvent, Charset, ConfigContent, ConfigCoordinate};
    use serial_test::serial;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_test_config() -> LogConfig {
        LogConfig {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }

    #[test]
    #[serial]
    fn test_logging_system_single_initialization() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();
        assert!(LoggingSystem::setup_logging(config.clone()).is_ok());
        assert!(LoggingSystem::is_initialized());

        // 第二次初始化直接返回
        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_force_reinit() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();
        let _system = LoggingSystem::setup_logging(config.clone()).unwrap();
        assert!(LoggingSystem::setup_logging_with_options(config, true).is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_with_file_output() {
        LoggingSystem::reset_for_testing();

        let temp_file = NamedTempFile::new().unwrap();
        let mut config = create_test_config();
        config.file_path = Some(temp_file.path().to_path_buf());
        config.console = false;

        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    #[serial]
    fn test_current_config_and_module_levels() {
        LoggingSystem::reset_for_testing();

        let mut config = create_test_config();
        config.json_format = true;
        config
            .module_levels
            .insert("nacos_property_source::client".to_string(), LevelFilter::Debug);
        let _system = LoggingSystem::setup_logging(config.clone()).unwrap();

        let current = LoggingSystem::current_config().unwrap();
        assert_eq!(current.level, config.level);
        assert!(current.json_format);
        assert_eq!(current.module_levels.len(), 1);
    }

    #[test]
    fn test_refresh_entry() {
        let refresher = PropertyViewRefresher::new();
        refresher
            .register(
                Arc::new(PropertyView::new("test.json")),
                crate::property::decoder_for(PropertyFormat::Json),
                Charset::Utf8,
            )
            .unwrap();

        let event = ChangeEvent::modified(
            ConfigCoordinate::for_data_id("test.json"),
            ConfigContent::new("{broken", 7),
        );
        let result = refresher.handle_event("test.json", &event);
        assert!(matches!(result, Err(RefreshError::Decode { .. })));

        let report = RefreshReport {
            view: "test.json".to_string(),
            coordinate: event.coordinate.clone(),
            kind: event.kind,
            outcome: None,
            error: result.err().map(|e| e.to_string()),
            revision: Some(7),
            timestamp: chrono::Utc::now(),
        };

        let entry = LoggingSystem::refresh_entry(&report);
        assert_eq!(entry["type"], "refresh");
        assert_eq!(entry["config_id"], "public+DEFAULT_GROUP+test.json");
        assert_eq!(entry["event"], "MODIFIED");
        assert_eq!(entry["revision"], 7);
        assert!(entry["outcome"].is_null());
        assert!(entry["error"].as_str().unwrap().contains("test.json"));

        // 不要求全局 subscriber，仅验证不会 panic
        LoggingSystem::new(create_test_config()).refresh_log(&report);
    }
}
