//! 配置变更事件

use crate::source::{ConfigContent, ConfigCoordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// 新增
    Added,
    /// 修改
    Modified,
    /// 删除
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "ADDED"),
            ChangeKind::Modified => write!(f, "MODIFIED"),
            ChangeKind::Deleted => write!(f, "DELETED"),
        }
    }
}

/// 配置变更事件
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// 发生变更的坐标
    pub coordinate: ConfigCoordinate,
    /// 变更类型
    pub kind: ChangeKind,
    /// 变更后的内容（删除事件为空）
    pub content: Option<ConfigContent>,
    /// 事件产生时间
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn added(coordinate: ConfigCoordinate, content: ConfigContent) -> Self {
        Self::new(coordinate, ChangeKind::Added, Some(content))
    }

    pub fn modified(coordinate: ConfigCoordinate, content: ConfigContent) -> Self {
        Self::new(coordinate, ChangeKind::Modified, Some(content))
    }

    pub fn deleted(coordinate: ConfigCoordinate) -> Self {
        Self::new(coordinate, ChangeKind::Deleted, None)
    }

    fn new(coordinate: ConfigCoordinate, kind: ChangeKind, content: Option<ConfigContent>) -> Self {
        Self {
            coordinate,
            kind,
            content,
            timestamp: Utc::now(),
        }
    }

    /// 是否需要应用到属性视图：新增或修改，且内容非空白
    pub fn is_applicable(&self) -> bool {
        matches!(self.kind, ChangeKind::Added | ChangeKind::Modified)
            && self.content.as_ref().is_some_and(|c| !c.is_blank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_applicability() {
        let coordinate = ConfigCoordinate::default();

        let modified = ChangeEvent::modified(coordinate.clone(), ConfigContent::new("a=b", 1));
        assert!(modified.is_applicable());

        let added = ChangeEvent::added(coordinate.clone(), ConfigContent::new("a=b", 1));
        assert!(added.is_applicable());

        let blank = ChangeEvent::modified(coordinate.clone(), ConfigContent::new("  ", 2));
        assert!(!blank.is_applicable());

        let deleted = ChangeEvent::deleted(coordinate);
        assert!(!deleted.is_applicable());
        assert_eq!(deleted.kind.to_string(), "DELETED");
    }
}
