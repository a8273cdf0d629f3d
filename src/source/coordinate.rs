//! 配置坐标
//!
//! `(namespaceId, group, dataId)` 三元组唯一标识一份远程配置

use serde::{Deserialize, Serialize};
use std::fmt;

/// 默认命名空间
pub const DEFAULT_NAMESPACE_ID: &str = "public";

/// 默认分组
pub const DEFAULT_GROUP_NAME: &str = "DEFAULT_GROUP";

/// 默认 dataId
pub const DEFAULT_DATA_ID: &str = "DEFAULT_DATA_ID";

/// 远程配置坐标
///
/// 结构化比较和哈希，直接作为客户端缓存和订阅的键使用，
/// 不存在字符串拼接带来的键冲突。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigCoordinate {
    namespace_id: String,
    group: String,
    data_id: String,
}

impl ConfigCoordinate {
    /// 创建新的配置坐标，空白字段回退为默认值
    pub fn new(
        namespace_id: impl Into<String>,
        group: impl Into<String>,
        data_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace_id: or_default(namespace_id.into(), DEFAULT_NAMESPACE_ID),
            group: or_default(group.into(), DEFAULT_GROUP_NAME),
            data_id: or_default(data_id.into(), DEFAULT_DATA_ID),
        }
    }

    /// 仅指定 dataId，其余使用默认值
    pub fn for_data_id(data_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE_ID, DEFAULT_GROUP_NAME, data_id)
    }

    /// 替换命名空间
    pub fn with_namespace(mut self, namespace_id: impl Into<String>) -> Self {
        self.namespace_id = or_default(namespace_id.into(), DEFAULT_NAMESPACE_ID);
        self
    }

    /// 替换分组
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = or_default(group.into(), DEFAULT_GROUP_NAME);
        self
    }

    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    /// 是否为默认（public）命名空间
    pub fn is_default_namespace(&self) -> bool {
        self.namespace_id == DEFAULT_NAMESPACE_ID
    }

    /// 可读的配置 ID，仅用于日志展示
    pub fn config_id(&self) -> String {
        format!("{}+{}+{}", self.namespace_id, self.group, self.data_id)
    }
}

impl Default for ConfigCoordinate {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_ID, DEFAULT_GROUP_NAME, DEFAULT_DATA_ID)
    }
}

impl fmt::Display for ConfigCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config_id())
    }
}

fn or_default(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}
