use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Context, Result};

use crate::backend::Backend;
use crate::cache::ContentCache;
use crate::config::{SyncConfig, WindowDefault};
use crate::events::{Notification, Notifier};
use crate::model::{
    now_millis, CreateEntity, EntityKind, EntityRecord, FloatPatch, FloatWindow, Scope,
    UpdateEntity,
};
use crate::trash::TrashStore;

mod folders;

pub use folders::FolderStore;

/// In-memory view of one entity kind (notes or tasks), kept consistent with
/// the backend through optimistic mutation and reconciliation.
///
/// Local state changes are applied either immediately (reorder) or after the
/// backend acknowledged the command (update, delete); failed batch operations
/// recover by re-fetching the authoritative listing rather than computing an
/// inverse. Content bodies flow through the bounded [`ContentCache`] so
/// re-selecting an entity does not re-fetch its body.
///
/// Interior state lives in `RefCell`s and is only touched between await
/// points; concurrent calls on one store interleave at backend awaits, never
/// in the middle of a local mutation.
pub struct EntityStore<B: Backend> {
    kind: EntityKind,
    backend: Rc<B>,
    notifier: Rc<Notifier>,
    trash: Rc<TrashStore<B>>,
    defaults: WindowDefault,
    cache: RefCell<ContentCache>,
    entities: RefCell<Vec<EntityRecord>>,
    selected: RefCell<Option<String>>,
    current_scope: RefCell<Option<Scope>>,
    last_error: RefCell<Option<String>>,
}

impl<B: Backend> EntityStore<B> {
    pub fn new(
        kind: EntityKind,
        backend: Rc<B>,
        notifier: Rc<Notifier>,
        trash: Rc<TrashStore<B>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            kind,
            backend,
            notifier,
            trash,
            defaults: config.floating.for_kind(kind),
            cache: RefCell::new(ContentCache::new(config.cache.capacity)),
            entities: RefCell::new(Vec::new()),
            selected: RefCell::new(None),
            current_scope: RefCell::new(None),
            last_error: RefCell::new(None),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn records(&self) -> Vec<EntityRecord> {
        self.entities.borrow().clone()
    }

    pub fn record(&self, id: &str) -> Option<EntityRecord> {
        self.entities.borrow().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.borrow().is_empty()
    }

    pub fn selected(&self) -> Option<String> {
        self.selected.borrow().clone()
    }

    pub fn select(&self, id: Option<&str>) {
        *self.selected.borrow_mut() = id.map(str::to_string);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Replace the collection with the backend's listing of every entity of
    /// this kind (trash excluded). Fetch failures keep the previous
    /// collection and set the error flag.
    pub async fn load_all(&self) {
        self.load_scope(Scope::all(self.kind)).await;
    }

    /// Replace the collection with one folder's listing. A full replace, not
    /// a merge: entities moved or deleted elsewhere drop out of view here.
    pub async fn load_folder(&self, path: &str) {
        self.load_scope(Scope::folder(self.kind, path)).await;
    }

    pub async fn load_scope(&self, scope: Scope) {
        match self.backend.list_entities(&scope).await {
            Ok(metas) => {
                let records: Vec<EntityRecord> = {
                    let mut cache = self.cache.borrow_mut();
                    metas
                        .into_iter()
                        .map(|mut meta| {
                            meta.float = self.defaults.place(meta.float);
                            let content = cache
                                .get(&meta.id)
                                .map(str::to_string)
                                .unwrap_or_default();
                            EntityRecord::from_meta(meta, content)
                        })
                        .collect()
                };
                *self.entities.borrow_mut() = records;
                *self.current_scope.borrow_mut() = Some(scope);
                *self.last_error.borrow_mut() = None;
                self.normalize_selection();
            }
            Err(err) => {
                tracing::warn!(kind = %self.kind, %err, "entity listing failed");
                *self.last_error.borrow_mut() = Some(err.to_string());
            }
        }
    }

    /// Content body for an entity: served from the cache when present,
    /// fetched (and written back through the cache) otherwise. A fetch
    /// failure is logged and yields an empty body; the next access retries.
    pub async fn load_content(&self, id: &str) -> String {
        let cached = self.cache.borrow_mut().get(id).map(str::to_string);
        if let Some(body) = cached {
            self.sync_record_content(id, &body);
            return body;
        }
        match self.backend.get_entity_content(self.kind, id).await {
            Ok(body) => {
                self.cache.borrow_mut().put(id, body.clone());
                self.sync_record_content(id, &body);
                body
            }
            Err(err) => {
                tracing::warn!(kind = %self.kind, %id, %err, "content fetch failed");
                *self.last_error.borrow_mut() = Some(err.to_string());
                String::new()
            }
        }
    }

    /// Create an entity. The backend assigns identity; the input's content
    /// seeds the cache so the body is never re-fetched right after creation.
    pub async fn create(&self, input: CreateEntity) -> Result<EntityRecord> {
        let content = input.content.clone().unwrap_or_default();
        let mut meta = self
            .backend
            .create_entity(self.kind, input)
            .await
            .with_context(|| format!("creating {}", self.kind))?;
        meta.float = self.defaults.place(meta.float);
        self.cache.borrow_mut().put(meta.id.clone(), content.clone());
        let record = EntityRecord::from_meta(meta, content);
        self.entities.borrow_mut().push(record.clone());
        self.notifier.emit(Notification::EntityUpdated {
            kind: self.kind,
            id: record.id.clone(),
        });
        Ok(record)
    }

    /// Apply a field-wise update. Geometry patches are completed against the
    /// entity's current full geometry before anything is sent, so a partial
    /// update never blanks unspecified fields. Local state changes only after
    /// the backend acknowledged; on failure the error propagates and every
    /// observable field keeps its pre-call value.
    pub async fn update(&self, mut update: UpdateEntity) -> Result<()> {
        if !update.float.is_empty() {
            let current = match self.record(&update.id) {
                Some(record) => record.float,
                None => bail!("{} {} not found", self.kind, update.id),
            };
            update.float = FloatPatch::set_all(update.float.merge_over(current));
        }
        let hides = update.float.show.value() == Some(&false);
        let applied = update.clone();

        self.backend
            .update_entity(self.kind, update)
            .await
            .with_context(|| format!("updating {} {}", self.kind, applied.id))?;

        // The entity can vanish while the call is in flight; re-find before
        // touching anything.
        {
            let mut entities = self.entities.borrow_mut();
            if let Some(record) = entities.iter_mut().find(|r| r.id == applied.id) {
                applied.title.apply_to(&mut record.title);
                applied.color.apply_to(&mut record.color);
                applied.pinned.apply_to(&mut record.pinned);
                applied.tags.apply_to(&mut record.tags);
                if let Some(&status) = applied.status.value() {
                    record.status = Some(status);
                }
                applied.due.apply_to(&mut record.due);
                record.float = applied.float.merge_over(record.float);
                if let Some(content) = applied.content.value() {
                    record.content = content.clone();
                }
                record.updated = now_millis();
            }
        }
        if let Some(content) = applied.content.value() {
            self.cache.borrow_mut().put(applied.id.clone(), content.clone());
        }
        self.notifier.emit(Notification::EntityUpdated {
            kind: self.kind,
            id: applied.id.clone(),
        });
        if hides {
            self.notifier.emit(Notification::EntityHidden {
                kind: self.kind,
                id: applied.id,
            });
        }
        Ok(())
    }

    /// Delete an entity (soft delete into the trash unless `permanent`).
    /// Failure propagates and leaves the entity in place so the view keeps
    /// reflecting reality.
    pub async fn delete(&self, id: &str, permanent: bool) -> Result<()> {
        self.backend
            .delete_entity(self.kind, id, permanent)
            .await
            .with_context(|| format!("deleting {} {}", self.kind, id))?;

        self.cache.borrow_mut().invalidate(id);
        self.entities.borrow_mut().retain(|r| r.id != id);
        let mut selected = self.selected.borrow_mut();
        if selected.as_deref() == Some(id) {
            *selected = None;
        }
        drop(selected);
        self.trash.refresh_counts().await;
        self.notifier.emit(Notification::EntityDeleted {
            kind: self.kind,
            id: id.to_string(),
        });
        Ok(())
    }

    /// Reorder entities inside one (folder, status) scope.
    ///
    /// The new ranks are applied locally first: each id's rank becomes its
    /// 1-based position within `ordered_ids` intersected with the scope;
    /// entities outside the scope or missing from the list are untouched. On
    /// backend failure the optimistic change is not inverted; the listing is
    /// re-fetched so local state converges to whatever the backend holds.
    pub async fn reorder(&self, scope: &Scope, ordered_ids: &[String]) {
        {
            let mut entities = self.entities.borrow_mut();
            let mut next_rank = 1u32;
            for id in ordered_ids {
                if let Some(record) = entities.iter_mut().find(|r| r.id == *id) {
                    if scope.contains(record) {
                        record.rank = next_rank;
                        next_rank += 1;
                    }
                }
            }
        }
        if let Err(err) = self.backend.reorder_entities(scope, ordered_ids).await {
            tracing::warn!(kind = %self.kind, %err, "reorder rejected, re-fetching listing");
            *self.last_error.borrow_mut() = Some(err.to_string());
            self.refetch(scope).await;
        }
    }

    /// Move an entity to another folder. On success the entity leaves the
    /// current view immediately; the destination scope picks it up on its own
    /// next fetch. On failure the listing is re-fetched.
    pub async fn move_to_folder(&self, id: &str, target: &str) {
        match self.backend.move_entity(self.kind, id, target).await {
            Ok(()) => {
                self.entities.borrow_mut().retain(|r| r.id != id);
                let mut selected = self.selected.borrow_mut();
                if selected.as_deref() == Some(id) {
                    *selected = None;
                }
                drop(selected);
                self.notifier.emit(Notification::EntityUpdated {
                    kind: self.kind,
                    id: id.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(kind = %self.kind, %id, %err, "move rejected, re-fetching listing");
                *self.last_error.borrow_mut() = Some(err.to_string());
                let scope = Scope::all(self.kind);
                self.refetch(&scope).await;
            }
        }
    }

    /// Persist a complete geometry tuple. Used by the floating write-back
    /// pipeline once per settled burst of move/resize events.
    pub async fn persist_geometry(&self, id: &str, float: FloatWindow) -> Result<()> {
        let update = UpdateEntity {
            id: id.to_string(),
            float: FloatPatch::set_all(float),
            ..UpdateEntity::default()
        };
        self.backend
            .update_entity(self.kind, update)
            .await
            .with_context(|| format!("persisting geometry of {} {}", self.kind, id))?;
        let mut entities = self.entities.borrow_mut();
        if let Some(record) = entities.iter_mut().find(|r| r.id == id) {
            record.float = float;
            record.updated = now_millis();
        }
        Ok(())
    }

    async fn refetch(&self, fallback: &Scope) {
        let scope = self
            .current_scope
            .borrow()
            .clone()
            .unwrap_or_else(|| fallback.clone());
        self.load_scope(scope).await;
    }

    fn sync_record_content(&self, id: &str, body: &str) {
        let mut entities = self.entities.borrow_mut();
        if let Some(record) = entities.iter_mut().find(|r| r.id == id) {
            if record.content != body {
                record.content = body.to_string();
            }
        }
    }

    fn normalize_selection(&self) {
        let mut selected = self.selected.borrow_mut();
        if let Some(id) = selected.as_deref() {
            let entities = self.entities.borrow();
            if !entities.iter().any(|r| r.id == id) {
                *selected = None;
            }
        }
    }

    #[cfg(test)]
    fn cache_contains(&self, id: &str) -> bool {
        self.cache.borrow().contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Patch;
    use crate::testing::FlakyBackend;

    fn fixture() -> (Rc<FlakyBackend>, EntityStore<FlakyBackend>) {
        let backend = Rc::new(FlakyBackend::new());
        let notifier = Rc::new(Notifier::new());
        let trash = Rc::new(TrashStore::new(backend.clone(), notifier.clone()));
        let store = EntityStore::new(
            EntityKind::Note,
            backend.clone(),
            notifier,
            trash,
            &SyncConfig::default(),
        );
        (backend, store)
    }

    fn note(title: &str, content: &str) -> CreateEntity {
        CreateEntity {
            title: title.to_string(),
            content: Some(content.to_string()),
            ..CreateEntity::default()
        }
    }

    #[tokio::test]
    async fn create_seeds_cache_and_load_content_skips_fetch() {
        let (backend, store) = fixture();
        let record = store.create(note("Greeting", "hello")).await.unwrap();
        assert_eq!(record.content, "hello");

        let body = store.load_content(&record.id).await;
        assert_eq!(body, "hello");
        assert_eq!(backend.inner().content_fetch_count(), 0);
    }

    #[tokio::test]
    async fn load_content_fetches_once_then_hits_cache() {
        let (backend, store) = fixture();
        let record = store.create(note("Doc", "body text")).await.unwrap();
        store.load_all().await;
        // Evict the created body so the first read has to go to the backend.
        store.cache.borrow_mut().invalidate(&record.id);

        let first = store.load_content(&record.id).await;
        let second = store.load_content(&record.id).await;
        assert_eq!(first, "body text");
        assert_eq!(second, "body text");
        assert_eq!(backend.inner().content_fetch_count(), 1);
        // The fetched body was written back into the in-memory record too.
        assert_eq!(store.record(&record.id).unwrap().content, "body text");
    }

    #[tokio::test]
    async fn listing_joins_cached_content_and_defaults_geometry() {
        let (_backend, store) = fixture();
        let record = store.create(note("Doc", "cached body")).await.unwrap();
        store.load_all().await;

        let loaded = store.record(&record.id).unwrap();
        assert_eq!(loaded.content, "cached body");
        // The backend has never seen a placement, so the kind default applies.
        assert!(!loaded.float.is_unset());
        assert_eq!(loaded.float.w, 320.0);
    }

    #[tokio::test]
    async fn failed_listing_keeps_previous_collection() {
        let (backend, store) = fixture();
        store.create(note("Keep", "k")).await.unwrap();
        store.load_all().await;
        assert_eq!(store.len(), 1);

        backend.fail("list_entities");
        store.load_all().await;
        assert_eq!(store.len(), 1, "collection must survive a fetch failure");
        assert!(store.last_error().is_some());
    }

    #[tokio::test]
    async fn failed_update_leaves_fields_exactly_pre_call() {
        let (backend, store) = fixture();
        let record = store.create(note("Original", "body")).await.unwrap();
        store.load_all().await;
        let before = store.record(&record.id).unwrap();

        backend.fail("update_entity");
        let mut update = UpdateEntity::for_id(&record.id);
        update.title = Patch::Set("Changed".into());
        update.pinned = Patch::Set(true);
        let result = store.update(update).await;

        assert!(result.is_err(), "mutation failure must propagate");
        assert_eq!(store.record(&record.id).unwrap(), before);
    }

    #[tokio::test]
    async fn update_applies_after_acknowledgement_and_bumps_updated() {
        let (_backend, store) = fixture();
        let record = store.create(note("Original", "body")).await.unwrap();
        let before = store.record(&record.id).unwrap();

        let mut update = UpdateEntity::for_id(&record.id);
        update.title = Patch::Set("Renamed".into());
        update.content = Patch::Set("new body".into());
        store.update(update).await.unwrap();

        let after = store.record(&record.id).unwrap();
        assert_eq!(after.title, "Renamed");
        assert_eq!(after.content, "new body");
        assert!(after.updated >= before.updated);
        // Content changes are written through the cache synchronously.
        assert_eq!(store.load_content(&record.id).await, "new body");
    }

    #[tokio::test]
    async fn partial_geometry_update_never_blanks_other_fields() {
        let (backend, store) = fixture();
        let record = store.create(note("Floaty", "")).await.unwrap();
        store.load_all().await;
        let placed = store.record(&record.id).unwrap().float;
        assert!(placed.w > 0.0);

        let mut update = UpdateEntity::for_id(&record.id);
        update.float.x = Patch::Set(640.0);
        store.update(update).await.unwrap();

        let after = store.record(&record.id).unwrap().float;
        assert_eq!(after.x, 640.0);
        assert_eq!(after.w, placed.w, "width must survive a position-only update");
        assert_eq!(after.h, placed.h);

        // The backend received the complete tuple, not a partial one.
        let sent = backend.last_update().unwrap();
        assert!(sent.float.x.is_set());
        assert!(sent.float.y.is_set());
        assert!(sent.float.w.is_set());
        assert!(sent.float.h.is_set());
        assert!(sent.float.show.is_set());
    }

    #[tokio::test]
    async fn delete_clears_selection_cache_and_counters() {
        let (_backend, store) = fixture();
        let record = store.create(note("Doomed", "bye")).await.unwrap();
        store.select(Some(&record.id));
        assert!(store.cache_contains(&record.id));

        store.delete(&record.id, false).await.unwrap();

        assert_eq!(store.selected(), None);
        assert!(!store.cache_contains(&record.id));
        assert!(store.record(&record.id).is_none());
        assert_eq!(store.trash.counts().notes, 1);
    }

    #[tokio::test]
    async fn failed_delete_keeps_entity_and_selection() {
        let (backend, store) = fixture();
        let record = store.create(note("Survivor", "s")).await.unwrap();
        store.select(Some(&record.id));

        backend.fail("delete_entity");
        let result = store.delete(&record.id, false).await;

        assert!(result.is_err());
        assert!(store.record(&record.id).is_some());
        assert_eq!(store.selected(), Some(record.id.clone()));
        assert!(store.cache_contains(&record.id));
    }

    #[tokio::test]
    async fn reorder_applies_optimistically() {
        let (_backend, store) = fixture();
        let a = store.create(note("A", "")).await.unwrap();
        let b = store.create(note("B", "")).await.unwrap();
        let c = store.create(note("C", "")).await.unwrap();
        store.load_all().await;

        let scope = Scope::folder(EntityKind::Note, "/folders");
        store
            .reorder(&scope, &[b.id.clone(), c.id.clone(), a.id.clone()])
            .await;

        assert_eq!(store.record(&b.id).unwrap().rank, 1);
        assert_eq!(store.record(&c.id).unwrap().rank, 2);
        assert_eq!(store.record(&a.id).unwrap().rank, 3);
    }

    #[tokio::test]
    async fn failed_reorder_converges_to_backend_order_via_refetch() {
        let (backend, store) = fixture();
        let a = store.create(note("A", "")).await.unwrap();
        let b = store.create(note("B", "")).await.unwrap();
        let c = store.create(note("C", "")).await.unwrap();
        store.load_all().await;

        backend.fail("reorder_entities");
        let scope = Scope::folder(EntityKind::Note, "/folders");
        store
            .reorder(&scope, &[b.id.clone(), c.id.clone(), a.id.clone()])
            .await;

        // The backend never applied the reorder, so the refetch restores the
        // authoritative creation order, not the optimistic one.
        assert_eq!(store.record(&a.id).unwrap().rank, 1);
        assert_eq!(store.record(&b.id).unwrap().rank, 2);
        assert_eq!(store.record(&c.id).unwrap().rank, 3);
        assert!(store.last_error().is_some());
    }

    #[tokio::test]
    async fn reorder_skips_ids_outside_scope() {
        let (_backend, store) = fixture();
        let a = store.create(note("A", "")).await.unwrap();
        let b = store.create(note("B", "")).await.unwrap();
        store.load_all().await;

        let scope = Scope::folder(EntityKind::Note, "/folders/elsewhere");
        store.reorder(&scope, &[b.id.clone(), a.id.clone()]).await;

        // Nothing matched the scope, so ranks stay as listed.
        assert_eq!(store.record(&a.id).unwrap().rank, 1);
        assert_eq!(store.record(&b.id).unwrap().rank, 2);
    }

    #[tokio::test]
    async fn move_removes_entity_from_current_view() {
        let (backend, store) = fixture();
        let record = store.create(note("Mover", "m")).await.unwrap();
        let target = backend
            .inner()
            .create_folder(crate::model::CreateFolder {
                name: "Target".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.load_all().await;
        assert_eq!(store.len(), 1);

        store.move_to_folder(&record.id, &target.path).await;

        assert!(store.record(&record.id).is_none(), "entity must leave the view");
        // The destination scope sees it on its own next fetch.
        store.load_folder(&target.path).await;
        assert!(store.record(&record.id).is_some());
    }

    #[tokio::test]
    async fn content_fetch_failure_returns_empty_and_recovers() {
        let (backend, store) = fixture();
        let record = store.create(note("Flaky", "real body")).await.unwrap();
        store.load_all().await;
        // Push the created body out of the picture to force a fetch path.
        store.cache.borrow_mut().invalidate(&record.id);

        backend.fail("get_entity_content");
        let body = store.load_content(&record.id).await;
        assert_eq!(body, "");
        assert!(store.last_error().is_some());

        backend.recover("get_entity_content");
        let body = store.load_content(&record.id).await;
        assert_eq!(body, "real body");
    }
}
