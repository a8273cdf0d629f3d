//! 配置源基础模型
//!
//! 坐标、内容和变更事件

pub mod content;
pub mod coordinate;
pub mod event;

// 重新导出主要类型
pub use content::{Charset, ConfigContent, FetchOutcome};
pub use coordinate::{ConfigCoordinate, DEFAULT_DATA_ID, DEFAULT_GROUP_NAME, DEFAULT_NAMESPACE_ID};
pub use event::{ChangeEvent, ChangeKind};
