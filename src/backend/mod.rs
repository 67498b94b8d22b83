use thiserror::Error;

use crate::model::{
    CreateEntity, CreateFolder, EntityKind, EntityMeta, FolderNode, FolderPatch, Scope,
    TrashCounts, TrashItem, UpdateEntity,
};

pub mod memory;

/// Failure reported by a backend command. The message is opaque to the sync
/// layer; `operation` names the command that failed for diagnostics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct BackendError {
    pub operation: &'static str,
    pub message: String,
}

impl BackendError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Asynchronous command surface of the persistence service.
///
/// Every call either fully applies server-side or reports a failure; there is
/// no partial success at this boundary. Calls race independently; the sync
/// layer serialises them itself where ordering matters.
///
/// Consumers run on a single logical thread, so futures are not required to
/// be `Send`.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn list_entities(&self, scope: &Scope) -> BackendResult<Vec<EntityMeta>>;
    async fn get_entity_content(&self, kind: EntityKind, id: &str) -> BackendResult<String>;
    async fn create_entity(&self, kind: EntityKind, input: CreateEntity)
        -> BackendResult<EntityMeta>;
    async fn update_entity(&self, kind: EntityKind, update: UpdateEntity) -> BackendResult<()>;
    async fn delete_entity(&self, kind: EntityKind, id: &str, permanent: bool)
        -> BackendResult<()>;
    async fn reorder_entities(&self, scope: &Scope, ordered_ids: &[String]) -> BackendResult<()>;
    async fn move_entity(
        &self,
        kind: EntityKind,
        id: &str,
        target_folder: &str,
    ) -> BackendResult<()>;

    async fn list_folders(&self) -> BackendResult<Vec<FolderNode>>;
    async fn create_folder(&self, input: CreateFolder) -> BackendResult<FolderNode>;
    async fn update_folder(&self, path: &str, patch: FolderPatch) -> BackendResult<()>;
    async fn rename_folder(&self, path: &str, new_name: &str) -> BackendResult<()>;
    async fn delete_folder(&self, path: &str) -> BackendResult<()>;
    async fn reorder_folders(&self, parent: Option<&str>, ordered_ids: &[String])
        -> BackendResult<()>;
    async fn move_folder(&self, path: &str, new_parent: Option<&str>) -> BackendResult<()>;

    async fn list_trash(&self, kind: EntityKind) -> BackendResult<Vec<TrashItem>>;
    async fn trash_counts(&self) -> BackendResult<TrashCounts>;
    async fn empty_trash(&self) -> BackendResult<()>;
    async fn restore_all_trash(&self) -> BackendResult<()>;
}
