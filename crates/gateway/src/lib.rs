//! `ov-gateway`: the binary crate that turns the core orchestration pieces
//! (catalog, filter, orchestrator, planner, decision, executor, coordinator)
//! into a runnable service — process wiring, the HTTP/WS/SSE surface, and
//! the CLI entry point.

pub mod api;
pub mod bootstrap;
pub mod cancel;
pub mod cli;
pub mod confirmation;
pub mod coordinator;
pub mod decision;
pub mod executor;
pub mod history_store;
pub mod lifecycle;
pub mod persistence;
pub mod planner;
pub mod session_lock;

pub use bootstrap::{build_app_state, spawn_background_tasks, AppState};
pub use coordinator::{handle_turn, resume_with_parameters, CoordinatorDeps};
