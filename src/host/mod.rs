//! 旧版插件宿主
//!
//! 在新宿主上承载旧版插件：插件抽象、生命周期和进程级登记表。

pub mod plugin;
pub mod runtime;

// 重新导出主要类型
pub use plugin::{LegacyMod, ModHost, ModVersionPolicy, ShutdownEvent, LEGACY_ID_PREFIX, TOGGLE_SECTION};
pub use runtime::ShimHost;
