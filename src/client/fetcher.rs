//! 一次性配置拉取
//!
//! 在调用方指定的超时时间内完成一次远程读取

use crate::client::ConfigClient;
use crate::error::FetchError;
use crate::source::{ConfigCoordinate, FetchOutcome};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// 配置拉取器
#[derive(Debug, Clone, Copy)]
pub struct ConfigFetcher {
    /// 单次拉取超时时间
    timeout: Duration,
}

impl Default for ConfigFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl ConfigFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 拉取坐标下的配置
    ///
    /// # 返回
    /// * `Ok(FetchOutcome::NotFound)` - 坐标下没有配置（不是错误）
    /// * `Err(FetchError)` - 超时、连接失败或响应异常
    pub async fn fetch(
        &self,
        client: &dyn ConfigClient,
        coordinate: &ConfigCoordinate,
    ) -> Result<FetchOutcome, FetchError> {
        let start_time = Instant::now();

        let result = match timeout(self.timeout, client.get_config(coordinate)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "拉取配置超时: {} ({}ms)",
                    coordinate,
                    self.timeout.as_millis()
                );
                return Err(FetchError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let outcome = FetchOutcome::from(result?);
        debug!(
            "拉取配置完成: {} (找到: {}, 耗时: {}ms)",
            coordinate,
            !outcome.is_not_found(),
            start_time.elapsed().as_millis()
        );

        Ok(outcome)
    }
}
