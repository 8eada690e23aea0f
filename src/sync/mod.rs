pub mod engine;
pub mod mapping;
pub mod state;

pub use engine::{SyncReport, Synchronizer, TaskStore};
pub use state::{SyncState, SyncStateStore};
