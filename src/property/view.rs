//! 属性视图
//!
//! 视图内容以整体快照的方式替换，读取方始终看到某一次拉取的完整结果

use crate::property::Properties;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// 视图在某一时刻的完整内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    /// 键值对（按文档顺序）
    entries: Properties,
    /// 来源内容的修订号
    revision: Option<i64>,
    /// 来源内容的指纹
    md5: Option<String>,
    /// 最近一次替换时间
    updated_at: Option<DateTime<Utc>>,
}

impl ViewState {
    /// 由一次拉取的解码结果创建
    pub fn populated(entries: Properties, revision: i64, md5: impl Into<String>) -> Self {
        Self {
            entries,
            revision: Some(revision),
            md5: Some(md5.into()),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn entries(&self) -> &Properties {
        &self.entries
    }

    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    pub fn md5(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 是否已经由远程内容填充过
    pub fn is_populated(&self) -> bool {
        self.revision.is_some()
    }
}

/// 命名属性视图
///
/// 名称在创建后不变，刷新只替换内容。
#[derive(Debug)]
pub struct PropertyView {
    name: String,
    state: ArcSwap<ViewState>,
}

impl PropertyView {
    /// 创建空视图
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, ViewState::default())
    }

    /// 以初始内容创建视图
    pub fn with_state(name: impl Into<String>, state: ViewState) -> Self {
        Self {
            name: name.into(),
            state: ArcSwap::from_pointee(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前内容的一致快照
    pub fn snapshot(&self) -> Arc<ViewState> {
        self.state.load_full()
    }

    /// 读取单个属性
    pub fn get_property(&self, key: &str) -> Option<String> {
        self.state.load().get(key).map(str::to_string)
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.state.load().entries.contains_key(key)
    }

    /// 所有属性名（按文档顺序）
    pub fn property_names(&self) -> Vec<String> {
        self.state.load().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.load().is_empty()
    }

    /// 以读-拷贝-更新的方式替换内容
    ///
    /// 并发写入时 `f` 可能被重复调用。
    ///
    /// # 返回
    /// * `Arc<ViewState>` - 被替换前的内容
    pub(crate) fn update<F>(&self, f: F) -> Arc<ViewState>
    where
        F: FnMut(&Arc<ViewState>) -> Arc<ViewState>,
    {
        self.state.rcu(f)
    }
}
