//! 属性源模块
//!
//! 内容解码、属性视图、组合属性源、视图刷新和属性源加载

pub mod composite;
pub mod decoder;
pub mod loader;
pub mod refresher;
pub mod view;

// 重新导出主要类型
pub use composite::CompositePropertySource;
pub use decoder::{
    decoder_for, JsonDecoder, Properties, PropertiesDecoder, PropertyDecoder, PropertyFormat,
    TomlDecoder, YamlDecoder,
};
pub use loader::{refresh_target, LoadedPropertySource, PropertySourceLoader};
pub use refresher::{PropertyViewRefresher, RefreshOutcome, RefreshReport, RefreshStats};
pub use view::{PropertyView, ViewState};
