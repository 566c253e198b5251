pub mod catalog;
pub mod connections;
pub mod filter_dsl;
pub mod orchestrator;
pub mod placeholder;
pub mod user_filter;

pub use catalog::ToolCatalog;
pub use connections::{ConnectionInfo, UserConnections};
pub use orchestrator::ToolOrchestrator;
pub use placeholder::resolve_placeholders;
pub use user_filter::UserToolFilter;
