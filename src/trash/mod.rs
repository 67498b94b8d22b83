use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::backend::Backend;
use crate::events::{Notification, Notifier};
use crate::model::{EntityKind, TrashCounts, TrashItem};

/// Trash listings and the deletion-derived aggregate counters shown in
/// navigation badges. Counters are refreshed by this store and by entity
/// deletes elsewhere; listings are full replacements of the previous
/// snapshot.
pub struct TrashStore<B: Backend> {
    backend: Rc<B>,
    notifier: Rc<Notifier>,
    items: RefCell<Vec<TrashItem>>,
    counts: RefCell<TrashCounts>,
    last_error: RefCell<Option<String>>,
}

impl<B: Backend> TrashStore<B> {
    pub fn new(backend: Rc<B>, notifier: Rc<Notifier>) -> Self {
        Self {
            backend,
            notifier,
            items: RefCell::new(Vec::new()),
            counts: RefCell::new(TrashCounts::default()),
            last_error: RefCell::new(None),
        }
    }

    pub fn items(&self) -> Vec<TrashItem> {
        self.items.borrow().clone()
    }

    pub fn counts(&self) -> TrashCounts {
        *self.counts.borrow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Replace the listing with the backend's view of one kind's trash.
    /// Fetch failures keep the previous listing and set the error flag.
    pub async fn load(&self, kind: EntityKind) {
        match self.backend.list_trash(kind).await {
            Ok(items) => {
                *self.items.borrow_mut() = items;
                *self.last_error.borrow_mut() = None;
            }
            Err(err) => {
                tracing::warn!(%kind, %err, "failed to list trash");
                *self.last_error.borrow_mut() = Some(err.to_string());
            }
        }
    }

    /// Re-read the aggregate counters. Called after every delete so badges
    /// stay in step without a full trash listing.
    pub async fn refresh_counts(&self) {
        match self.backend.trash_counts().await {
            Ok(counts) => {
                *self.counts.borrow_mut() = counts;
                *self.last_error.borrow_mut() = None;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to refresh trash counts");
                *self.last_error.borrow_mut() = Some(err.to_string());
            }
        }
    }

    pub async fn empty(&self) -> Result<()> {
        self.backend
            .empty_trash()
            .await
            .context("emptying trash")?;
        self.items.borrow_mut().clear();
        self.refresh_counts().await;
        self.notifier.emit(Notification::TrashEmptied);
        Ok(())
    }

    pub async fn restore_all(&self) -> Result<()> {
        self.backend
            .restore_all_trash()
            .await
            .context("restoring trash")?;
        self.items.borrow_mut().clear();
        self.refresh_counts().await;
        self.notifier.emit(Notification::TrashRestored);
        Ok(())
    }
}
