pub mod backend;
pub mod cache;
pub mod config;
pub mod events;
pub mod floating;
pub mod logging;
pub mod model;
pub mod store;
pub mod trash;
pub mod tree;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendError, BackendResult};
pub use config::{ConfigLoader, ConfigPaths, SyncConfig};
pub use events::{Notification, Notifier};
pub use store::{EntityStore, FolderStore};
