//! 组合属性源
//!
//! 按声明顺序持有多个属性视图，查询时返回第一个命中的值

use crate::property::PropertyView;
use arc_swap::ArcSwap;
use indexmap::IndexSet;
use std::sync::Arc;

/// 组合属性源
#[derive(Debug)]
pub struct CompositePropertySource {
    name: String,
    views: ArcSwap<Vec<Arc<PropertyView>>>,
}

impl CompositePropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            views: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 追加一个视图，优先级低于已有视图
    pub fn add_view(&self, view: Arc<PropertyView>) {
        self.views.rcu(|views| {
            let mut next = Vec::with_capacity(views.len() + 1);
            next.extend(views.iter().cloned());
            next.push(Arc::clone(&view));
            next
        });
    }

    /// 所有视图（按声明顺序）
    pub fn views(&self) -> Vec<Arc<PropertyView>> {
        self.views.load().iter().cloned().collect()
    }

    /// 按名称查找视图
    pub fn view(&self, name: &str) -> Option<Arc<PropertyView>> {
        self.views
            .load()
            .iter()
            .find(|view| view.name() == name)
            .cloned()
    }

    pub fn view_count(&self) -> usize {
        self.views.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.load().is_empty()
    }

    /// 读取属性，返回第一个包含该键的视图中的值
    pub fn get_property(&self, key: &str) -> Option<String> {
        self.views
            .load()
            .iter()
            .find_map(|view| view.get_property(key))
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.views
            .load()
            .iter()
            .any(|view| view.contains_property(key))
    }

    /// 所有视图的属性名（去重，保持首次出现的顺序）
    pub fn property_names(&self) -> Vec<String> {
        let mut names = IndexSet::new();
        for view in self.views.load().iter() {
            names.extend(view.property_names());
        }
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{Properties, ViewState};

    fn view(name: &str, pairs: &[(&str, &str)]) -> Arc<PropertyView> {
        let entries: Properties = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(PropertyView::with_state(
            name,
            ViewState::populated(entries, 1, name),
        ))
    }

    #[test]
    fn test_first_match_wins() {
        let composite = CompositePropertySource::new("defaultNacosPropertySource");
        composite.add_view(view("test.json", &[("my.name", "mercyblitz")]));
        composite.add_view(view(
            "test.properties",
            &[("my.name", "other"), ("my.age", "18")],
        ));

        assert_eq!(composite.view_count(), 2);
        assert_eq!(composite.get_property("my.name").as_deref(), Some("mercyblitz"));
        assert_eq!(composite.get_property("my.age").as_deref(), Some("18"));
        assert!(composite.get_property("missing").is_none());
        assert!(composite.contains_property("my.age"));
        assert_eq!(
            composite.property_names(),
            vec!["my.name".to_string(), "my.age".to_string()]
        );
    }

    #[test]
    fn test_view_lookup_preserves_order() {
        let composite = CompositePropertySource::new("source");
        assert!(composite.is_empty());

        composite.add_view(view("a", &[]));
        composite.add_view(view("b", &[]));

        let names: Vec<_> = composite
            .views()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(composite.view("b").is_some());
        assert!(composite.view("c").is_none());
    }
}
