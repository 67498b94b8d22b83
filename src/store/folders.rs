use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::backend::Backend;
use crate::events::{Notification, Notifier};
use crate::model::{CreateFolder, FolderNode, FolderPatch};

/// Client view of the folder tree.
///
/// Folder paths encode hierarchy and sibling order, so rename, reorder and
/// move can shift the paths of whole subtrees server-side. The client never
/// tries to predict those shifts: every successful structural operation is
/// followed by a full tree re-fetch, trading a round-trip for zero staleness.
pub struct FolderStore<B: Backend> {
    backend: Rc<B>,
    notifier: Rc<Notifier>,
    tree: RefCell<Vec<FolderNode>>,
    last_error: RefCell<Option<String>>,
}

impl<B: Backend> FolderStore<B> {
    pub fn new(backend: Rc<B>, notifier: Rc<Notifier>) -> Self {
        Self {
            backend,
            notifier,
            tree: RefCell::new(Vec::new()),
            last_error: RefCell::new(None),
        }
    }

    /// Latest fetched snapshot of the tree. Derived views (flat lists,
    /// breadcrumbs) are computed from this via the `tree` module.
    pub fn tree(&self) -> Vec<FolderNode> {
        self.tree.borrow().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    pub async fn load(&self) {
        match self.backend.list_folders().await {
            Ok(tree) => {
                *self.tree.borrow_mut() = tree;
                *self.last_error.borrow_mut() = None;
            }
            Err(err) => {
                tracing::warn!(%err, "folder listing failed");
                *self.last_error.borrow_mut() = Some(err.to_string());
            }
        }
    }

    pub async fn create(&self, input: CreateFolder) -> Result<FolderNode> {
        let node = self
            .backend
            .create_folder(input)
            .await
            .context("creating folder")?;
        self.load().await;
        Ok(node)
    }

    /// Metadata-only update (pinned/favorite/color/icon). Paths do not shift,
    /// so the acknowledged patch is applied in place.
    pub async fn update_meta(&self, path: &str, patch: FolderPatch) -> Result<()> {
        self.backend
            .update_folder(path, patch.clone())
            .await
            .with_context(|| format!("updating folder {path}"))?;
        let mut tree = self.tree.borrow_mut();
        if let Some(node) = find_mut(&mut tree, path) {
            patch.pinned.apply_to(&mut node.pinned);
            patch.favorite.apply_to(&mut node.favorite);
            patch.color.apply_to(&mut node.color);
            patch.icon.apply_to(&mut node.icon);
        }
        Ok(())
    }

    pub async fn rename(&self, path: &str, new_name: &str) {
        if let Err(err) = self.backend.rename_folder(path, new_name).await {
            tracing::warn!(%path, %err, "folder rename rejected");
            *self.last_error.borrow_mut() = Some(err.to_string());
        }
        // Paths shifted (or the rename failed and we want the authoritative
        // view back either way): re-fetch.
        self.load().await;
    }

    pub async fn reorder(&self, parent: Option<&str>, ordered_ids: &[String]) {
        if let Err(err) = self.backend.reorder_folders(parent, ordered_ids).await {
            tracing::warn!(%err, "folder reorder rejected");
            *self.last_error.borrow_mut() = Some(err.to_string());
        }
        self.load().await;
    }

    pub async fn move_folder(&self, path: &str, new_parent: Option<&str>) {
        if let Err(err) = self.backend.move_folder(path, new_parent).await {
            tracing::warn!(%path, %err, "folder move rejected");
            *self.last_error.borrow_mut() = Some(err.to_string());
        }
        self.load().await;
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.backend
            .delete_folder(path)
            .await
            .with_context(|| format!("deleting folder {path}"))?;
        self.load().await;
        self.notifier.emit(Notification::FolderDeleted {
            path: path.to_string(),
        });
        Ok(())
    }
}

fn find_mut<'a>(nodes: &'a mut [FolderNode], path: &str) -> Option<&'a mut FolderNode> {
    for node in nodes.iter_mut() {
        if node.path == path {
            return Some(node);
        }
        if let Some(found) = find_mut(&mut node.children, path) {
            return Some(found);
        }
    }
    None
}
