//! Backend decorators for tests: fault injection and latency gating.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use tokio::sync::Semaphore;

use crate::backend::memory::MemoryBackend;
use crate::backend::{Backend, BackendError, BackendResult};
use crate::model::{
    CreateEntity, CreateFolder, EntityKind, EntityMeta, FloatWindow, FolderNode, FolderPatch,
    Scope, TrashCounts, TrashItem, UpdateEntity,
};

/// Memory backend that can be told to reject selected operations, for
/// exercising the stores' failure paths.
pub(crate) struct FlakyBackend {
    inner: MemoryBackend,
    failing: RefCell<HashSet<&'static str>>,
    last_update: RefCell<Option<UpdateEntity>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            failing: RefCell::new(HashSet::new()),
            last_update: RefCell::new(None),
        }
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn fail(&self, operation: &'static str) {
        self.failing.borrow_mut().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.borrow_mut().remove(operation);
    }

    pub fn last_update(&self) -> Option<UpdateEntity> {
        self.last_update.borrow().clone()
    }

    fn trip(&self, operation: &'static str) -> BackendResult<()> {
        if self.failing.borrow().contains(operation) {
            Err(BackendError::new(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

impl Backend for FlakyBackend {
    async fn list_entities(&self, scope: &Scope) -> BackendResult<Vec<EntityMeta>> {
        self.trip("list_entities")?;
        self.inner.list_entities(scope).await
    }

    async fn get_entity_content(&self, kind: EntityKind, id: &str) -> BackendResult<String> {
        self.trip("get_entity_content")?;
        self.inner.get_entity_content(kind, id).await
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        input: CreateEntity,
    ) -> BackendResult<EntityMeta> {
        self.trip("create_entity")?;
        self.inner.create_entity(kind, input).await
    }

    async fn update_entity(&self, kind: EntityKind, update: UpdateEntity) -> BackendResult<()> {
        self.trip("update_entity")?;
        *self.last_update.borrow_mut() = Some(update.clone());
        self.inner.update_entity(kind, update).await
    }

    async fn delete_entity(
        &self,
        kind: EntityKind,
        id: &str,
        permanent: bool,
    ) -> BackendResult<()> {
        self.trip("delete_entity")?;
        self.inner.delete_entity(kind, id, permanent).await
    }

    async fn reorder_entities(&self, scope: &Scope, ordered_ids: &[String]) -> BackendResult<()> {
        self.trip("reorder_entities")?;
        self.inner.reorder_entities(scope, ordered_ids).await
    }

    async fn move_entity(
        &self,
        kind: EntityKind,
        id: &str,
        target_folder: &str,
    ) -> BackendResult<()> {
        self.trip("move_entity")?;
        self.inner.move_entity(kind, id, target_folder).await
    }

    async fn list_folders(&self) -> BackendResult<Vec<FolderNode>> {
        self.trip("list_folders")?;
        self.inner.list_folders().await
    }

    async fn create_folder(&self, input: CreateFolder) -> BackendResult<FolderNode> {
        self.trip("create_folder")?;
        self.inner.create_folder(input).await
    }

    async fn update_folder(&self, path: &str, patch: FolderPatch) -> BackendResult<()> {
        self.trip("update_folder")?;
        self.inner.update_folder(path, patch).await
    }

    async fn rename_folder(&self, path: &str, new_name: &str) -> BackendResult<()> {
        self.trip("rename_folder")?;
        self.inner.rename_folder(path, new_name).await
    }

    async fn delete_folder(&self, path: &str) -> BackendResult<()> {
        self.trip("delete_folder")?;
        self.inner.delete_folder(path).await
    }

    async fn reorder_folders(
        &self,
        parent: Option<&str>,
        ordered_ids: &[String],
    ) -> BackendResult<()> {
        self.trip("reorder_folders")?;
        self.inner.reorder_folders(parent, ordered_ids).await
    }

    async fn move_folder(&self, path: &str, new_parent: Option<&str>) -> BackendResult<()> {
        self.trip("move_folder")?;
        self.inner.move_folder(path, new_parent).await
    }

    async fn list_trash(&self, kind: EntityKind) -> BackendResult<Vec<TrashItem>> {
        self.trip("list_trash")?;
        self.inner.list_trash(kind).await
    }

    async fn trash_counts(&self) -> BackendResult<TrashCounts> {
        self.trip("trash_counts")?;
        self.inner.trash_counts().await
    }

    async fn empty_trash(&self) -> BackendResult<()> {
        self.trip("empty_trash")?;
        self.inner.empty_trash().await
    }

    async fn restore_all_trash(&self) -> BackendResult<()> {
        self.trip("restore_all_trash")?;
        self.inner.restore_all_trash().await
    }
}

/// Memory backend whose `update_entity` blocks until released, for driving
/// interleaved writes deterministically. Tracks how many updates were in
/// flight at once and the geometry of every completed write.
pub(crate) struct GatedBackend {
    inner: MemoryBackend,
    gate: Semaphore,
    in_flight: Cell<usize>,
    max_in_flight: Cell<usize>,
    completed: RefCell<Vec<(String, FloatWindow)>>,
}

impl GatedBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            gate: Semaphore::new(0),
            in_flight: Cell::new(0),
            max_in_flight: Cell::new(0),
            completed: RefCell::new(Vec::new()),
        }
    }

    /// Let `n` blocked updates through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.get()
    }

    pub fn completed(&self) -> Vec<(String, FloatWindow)> {
        self.completed.borrow().clone()
    }
}

impl Backend for GatedBackend {
    async fn list_entities(&self, scope: &Scope) -> BackendResult<Vec<EntityMeta>> {
        self.inner.list_entities(scope).await
    }

    async fn get_entity_content(&self, kind: EntityKind, id: &str) -> BackendResult<String> {
        self.inner.get_entity_content(kind, id).await
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        input: CreateEntity,
    ) -> BackendResult<EntityMeta> {
        self.inner.create_entity(kind, input).await
    }

    async fn update_entity(&self, kind: EntityKind, update: UpdateEntity) -> BackendResult<()> {
        self.in_flight.set(self.in_flight.get() + 1);
        self.max_in_flight
            .set(self.max_in_flight.get().max(self.in_flight.get()));
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        let sent = update.float.merge_over(FloatWindow::default());
        self.completed
            .borrow_mut()
            .push((update.id.clone(), sent));
        let result = self.inner.update_entity(kind, update).await;
        self.in_flight.set(self.in_flight.get() - 1);
        result
    }

    async fn delete_entity(
        &self,
        kind: EntityKind,
        id: &str,
        permanent: bool,
    ) -> BackendResult<()> {
        self.inner.delete_entity(kind, id, permanent).await
    }

    async fn reorder_entities(&self, scope: &Scope, ordered_ids: &[String]) -> BackendResult<()> {
        self.inner.reorder_entities(scope, ordered_ids).await
    }

    async fn move_entity(
        &self,
        kind: EntityKind,
        id: &str,
        target_folder: &str,
    ) -> BackendResult<()> {
        self.inner.move_entity(kind, id, target_folder).await
    }

    async fn list_folders(&self) -> BackendResult<Vec<FolderNode>> {
        self.inner.list_folders().await
    }

    async fn create_folder(&self, input: CreateFolder) -> BackendResult<FolderNode> {
        self.inner.create_folder(input).await
    }

    async fn update_folder(&self, path: &str, patch: FolderPatch) -> BackendResult<()> {
        self.inner.update_folder(path, patch).await
    }

    async fn rename_folder(&self, path: &str, new_name: &str) -> BackendResult<()> {
        self.inner.rename_folder(path, new_name).await
    }

    async fn delete_folder(&self, path: &str) -> BackendResult<()> {
        self.inner.delete_folder(path).await
    }

    async fn reorder_folders(
        &self,
        parent: Option<&str>,
        ordered_ids: &[String],
    ) -> BackendResult<()> {
        self.inner.reorder_folders(parent, ordered_ids).await
    }

    async fn move_folder(&self, path: &str, new_parent: Option<&str>) -> BackendResult<()> {
        self.inner.move_folder(path, new_parent).await
    }

    async fn list_trash(&self, kind: EntityKind) -> BackendResult<Vec<TrashItem>> {
        self.inner.list_trash(kind).await
    }

    async fn trash_counts(&self) -> BackendResult<TrashCounts> {
        self.inner.trash_counts().await
    }

    async fn empty_trash(&self) -> BackendResult<()> {
        self.inner.empty_trash().await
    }

    async fn restore_all_trash(&self) -> BackendResult<()> {
        self.inner.restore_all_trash().await
    }
}
