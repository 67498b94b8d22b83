use parking_lot::Mutex;
use uuid::Uuid;

use super::{Backend, BackendError, BackendResult};
use crate::model::{
    now_millis, CreateEntity, CreateFolder, EntityKind, EntityMeta, FloatWindow, FolderNode,
    FolderPatch, Scope, TaskStatus, TrashCounts, TrashItem, UpdateEntity, TRASH_PATH,
};

const ROOT_FOLDER: &str = "/folders";
const DEFAULT_NOTE_COLOR: &str = "#6B9F78";
const DEFAULT_TASK_COLOR: &str = "#3B82F6";
const DEFAULT_FOLDER_COLOR: &str = "#6B7280";

/// In-process implementation of the backend command surface.
///
/// Mirrors the persistence service's observable behaviour: backend-assigned
/// uuid ids, next-free rank on create and move, dense 1-based ranks after
/// reorder and on every listing, a `.trash` sentinel folder for soft deletes,
/// and folder paths that shift on rename/reorder/move (which is why callers
/// re-fetch the tree after structural operations).
///
/// Commands are applied atomically under one lock; a failed command leaves
/// no partial state behind.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entities: Vec<StoredEntity>,
    folders: Vec<FolderNode>,
    folder_seq: u32,
    content_fetches: u64,
}

struct StoredEntity {
    meta: EntityMeta,
    content: String,
    /// Folder the entity lived in before it was trashed.
    restore_path: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of content bodies served so far. Lets callers verify that the
    /// cache layer actually short-circuits fetches.
    pub fn content_fetch_count(&self) -> u64 {
        self.state.lock().content_fetches
    }

    fn err(operation: &'static str, message: impl Into<String>) -> BackendError {
        BackendError::new(operation, message)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn find(&self, kind: EntityKind, id: &str) -> Option<usize> {
        self.entities
            .iter()
            .position(|e| e.meta.kind == kind && e.meta.id == id)
    }

    fn next_rank(&self, kind: EntityKind, folder: &str, status: Option<TaskStatus>) -> u32 {
        self.entities
            .iter()
            .filter(|e| {
                e.meta.kind == kind && e.meta.folder_path == folder && e.meta.status == status
            })
            .map(|e| e.meta.rank)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn in_scope(meta: &EntityMeta, scope: &Scope) -> bool {
        if meta.kind != scope.kind {
            return false;
        }
        let folder_ok = match &scope.folder {
            Some(folder) => meta.folder_path == *folder,
            None => meta.folder_path != TRASH_PATH,
        };
        if !folder_ok {
            return false;
        }
        match scope.status {
            Some(status) => meta.status == Some(status),
            None => true,
        }
    }

    /// Rewrite ranks densely (1-based) inside every (folder, status) bucket
    /// touched by the given scope. Listing always reports dense ranks.
    fn normalize_ranks(&mut self, scope: &Scope) {
        let mut buckets: Vec<(String, Option<TaskStatus>)> = Vec::new();
        for e in self.entities.iter() {
            if Self::in_scope(&e.meta, scope) {
                let key = (e.meta.folder_path.clone(), e.meta.status);
                if !buckets.contains(&key) {
                    buckets.push(key);
                }
            }
        }
        for (folder, status) in buckets {
            let mut members: Vec<usize> = self
                .entities
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    e.meta.kind == scope.kind
                        && e.meta.folder_path == folder
                        && e.meta.status == status
                })
                .map(|(i, _)| i)
                .collect();
            members.sort_by_key(|&i| self.entities[i].meta.rank);
            for (pos, &i) in members.iter().enumerate() {
                self.entities[i].meta.rank = (pos + 1) as u32;
            }
        }
    }

    fn folder_paths(node: &FolderNode, out: &mut Vec<String>) {
        out.push(node.path.clone());
        for child in &node.children {
            Self::folder_paths(child, out);
        }
    }

    fn find_folder_mut<'a>(nodes: &'a mut Vec<FolderNode>, path: &str) -> Option<&'a mut FolderNode> {
        for node in nodes.iter_mut() {
            if node.path == path {
                return Some(node);
            }
            if let Some(found) = Self::find_folder_mut(&mut node.children, path) {
                return Some(found);
            }
        }
        None
    }

    fn remove_folder(nodes: &mut Vec<FolderNode>, path: &str) -> Option<FolderNode> {
        if let Some(pos) = nodes.iter().position(|n| n.path == path) {
            return Some(nodes.remove(pos));
        }
        for node in nodes.iter_mut() {
            if let Some(removed) = Self::remove_folder(&mut node.children, path) {
                return Some(removed);
            }
        }
        None
    }

    fn children_of<'a>(
        nodes: &'a mut Vec<FolderNode>,
        parent: Option<&str>,
    ) -> Option<&'a mut Vec<FolderNode>> {
        match parent {
            None => Some(nodes),
            Some(path) => Self::find_folder_mut(nodes, path).map(|n| &mut n.children),
        }
    }

    /// Move a node (and recursively its subtree) to a new path, keeping the
    /// entities that live under the old paths attached to the new ones.
    fn rewrite_paths(&mut self, node: &mut FolderNode, new_path: String) {
        let old_path = std::mem::replace(&mut node.path, new_path.clone());
        for e in self.entities.iter_mut() {
            if e.meta.folder_path == old_path {
                e.meta.folder_path = new_path.clone();
            }
            if e.restore_path.as_deref() == Some(old_path.as_str()) {
                e.restore_path = Some(new_path.clone());
            }
        }
        let children = std::mem::take(&mut node.children);
        node.children = children
            .into_iter()
            .map(|mut child| {
                let leaf = child
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                self.rewrite_paths(&mut child, format!("{new_path}/{leaf}"));
                child
            })
            .collect();
    }
}

impl Backend for MemoryBackend {
    async fn list_entities(&self, scope: &Scope) -> BackendResult<Vec<EntityMeta>> {
        let mut state = self.state.lock();
        state.normalize_ranks(scope);
        let mut listed: Vec<EntityMeta> = state
            .entities
            .iter()
            .filter(|e| MemoryState::in_scope(&e.meta, scope))
            .map(|e| e.meta.clone())
            .collect();
        listed.sort_by(|a, b| {
            a.folder_path
                .cmp(&b.folder_path)
                .then(a.rank.cmp(&b.rank))
        });
        Ok(listed)
    }

    async fn get_entity_content(&self, kind: EntityKind, id: &str) -> BackendResult<String> {
        let mut state = self.state.lock();
        state.content_fetches += 1;
        let idx = state
            .find(kind, id)
            .ok_or_else(|| Self::err("get_entity_content", format!("{kind} {id} not found")))?;
        Ok(state.entities[idx].content.clone())
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        input: CreateEntity,
    ) -> BackendResult<EntityMeta> {
        if input.title.trim().is_empty() {
            return Err(Self::err("create_entity", "title cannot be empty"));
        }
        let mut state = self.state.lock();
        let folder = input
            .folder_path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ROOT_FOLDER.to_string());
        let status = match kind {
            EntityKind::Task => Some(input.status.unwrap_or_default()),
            EntityKind::Note => None,
        };
        let rank = state.next_rank(kind, &folder, status);
        let now = now_millis();
        let meta = EntityMeta {
            id: Uuid::new_v4().to_string(),
            kind,
            title: input.title.trim().to_string(),
            rank,
            color: input.color.unwrap_or_else(|| {
                match kind {
                    EntityKind::Note => DEFAULT_NOTE_COLOR,
                    EntityKind::Task => DEFAULT_TASK_COLOR,
                }
                .to_string()
            }),
            pinned: false,
            tags: input.tags.unwrap_or_default(),
            created: now,
            updated: now,
            folder_path: folder,
            status,
            due: input.due,
            float: FloatWindow::default(),
        };
        state.entities.push(StoredEntity {
            meta: meta.clone(),
            content: input.content.unwrap_or_default(),
            restore_path: None,
        });
        Ok(meta)
    }

    async fn update_entity(&self, kind: EntityKind, update: UpdateEntity) -> BackendResult<()> {
        let mut state = self.state.lock();
        let idx = state
            .find(kind, &update.id)
            .ok_or_else(|| Self::err("update_entity", format!("{kind} {} not found", update.id)))?;
        let entry = &mut state.entities[idx];
        update.title.apply_to(&mut entry.meta.title);
        update.color.apply_to(&mut entry.meta.color);
        update.pinned.apply_to(&mut entry.meta.pinned);
        update.tags.apply_to(&mut entry.meta.tags);
        if let Some(&status) = update.status.value() {
            entry.meta.status = Some(status);
        }
        update.due.apply_to(&mut entry.meta.due);
        entry.meta.float = update.float.merge_over(entry.meta.float);
        if let Some(content) = update.content.value() {
            entry.content = content.clone();
        }
        entry.meta.updated = now_millis();
        Ok(())
    }

    async fn delete_entity(
        &self,
        kind: EntityKind,
        id: &str,
        permanent: bool,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let idx = state
            .find(kind, id)
            .ok_or_else(|| Self::err("delete_entity", format!("{kind} {id} not found")))?;
        if permanent {
            state.entities.remove(idx);
        } else {
            let entry = &mut state.entities[idx];
            entry.restore_path = Some(entry.meta.folder_path.clone());
            entry.meta.folder_path = TRASH_PATH.to_string();
            entry.meta.updated = now_millis();
        }
        Ok(())
    }

    async fn reorder_entities(&self, scope: &Scope, ordered_ids: &[String]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let mut next_rank = 1u32;
        for id in ordered_ids {
            if let Some(idx) = state.find(scope.kind, id) {
                if MemoryState::in_scope(&state.entities[idx].meta, scope) {
                    state.entities[idx].meta.rank = next_rank;
                    next_rank += 1;
                }
            }
        }
        Ok(())
    }

    async fn move_entity(
        &self,
        kind: EntityKind,
        id: &str,
        target_folder: &str,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let idx = state
            .find(kind, id)
            .ok_or_else(|| Self::err("move_entity", format!("{kind} {id} not found")))?;
        let status = state.entities[idx].meta.status;
        let rank = state.next_rank(kind, target_folder, status);
        let entry = &mut state.entities[idx];
        entry.meta.folder_path = target_folder.to_string();
        entry.meta.rank = rank;
        entry.meta.updated = now_millis();
        Ok(())
    }

    async fn list_folders(&self) -> BackendResult<Vec<FolderNode>> {
        Ok(self.state.lock().folders.clone())
    }

    async fn create_folder(&self, input: CreateFolder) -> BackendResult<FolderNode> {
        if input.name.trim().is_empty() {
            return Err(Self::err("create_folder", "folder name cannot be empty"));
        }
        let mut state = self.state.lock();
        let parent = input.parent_path.filter(|p| !p.is_empty());
        state.folder_seq += 1;
        let base = parent.as_deref().unwrap_or(ROOT_FOLDER);
        let path = format!("{base}/{:06}-{}", state.folder_seq, slugify(&input.name));
        let node = FolderNode {
            id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            path,
            pinned: false,
            favorite: false,
            color: input
                .color
                .unwrap_or_else(|| DEFAULT_FOLDER_COLOR.to_string()),
            icon: String::new(),
            children: Vec::new(),
        };
        let slot = MemoryState::children_of(&mut state.folders, parent.as_deref())
            .ok_or_else(|| Self::err("create_folder", "parent folder not found"))?;
        slot.push(node.clone());
        Ok(node)
    }

    async fn update_folder(&self, path: &str, patch: FolderPatch) -> BackendResult<()> {
        let mut state = self.state.lock();
        let node = MemoryState::find_folder_mut(&mut state.folders, path)
            .ok_or_else(|| Self::err("update_folder", format!("folder {path} not found")))?;
        patch.pinned.apply_to(&mut node.pinned);
        patch.favorite.apply_to(&mut node.favorite);
        patch.color.apply_to(&mut node.color);
        patch.icon.apply_to(&mut node.icon);
        Ok(())
    }

    async fn rename_folder(&self, path: &str, new_name: &str) -> BackendResult<()> {
        if new_name.trim().is_empty() {
            return Err(Self::err("rename_folder", "folder name cannot be empty"));
        }
        let mut state = self.state.lock();
        let mut node = MemoryState::remove_folder(&mut state.folders, path)
            .ok_or_else(|| Self::err("rename_folder", format!("folder {path} not found")))?;
        node.name = new_name.trim().to_string();
        // Renaming shifts the path's leaf segment while keeping the rank
        // prefix, so every descendant path shifts with it.
        let (base, leaf) = split_path(path);
        let prefix = leaf.split('-').next().unwrap_or("000000");
        let new_path = format!("{base}/{prefix}-{}", slugify(new_name));
        state.rewrite_paths(&mut node, new_path);
        let parent = if base.is_empty() || base == ROOT_FOLDER {
            None
        } else {
            Some(base.to_string())
        };
        let slot = MemoryState::children_of(&mut state.folders, parent.as_deref())
            .ok_or_else(|| Self::err("rename_folder", "parent folder not found"))?;
        slot.push(node);
        Ok(())
    }

    async fn delete_folder(&self, path: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        let removed = MemoryState::remove_folder(&mut state.folders, path)
            .ok_or_else(|| Self::err("delete_folder", format!("folder {path} not found")))?;
        let mut gone = Vec::new();
        MemoryState::folder_paths(&removed, &mut gone);
        let now = now_millis();
        for e in state.entities.iter_mut() {
            if gone.contains(&e.meta.folder_path) {
                e.restore_path = Some(ROOT_FOLDER.to_string());
                e.meta.folder_path = TRASH_PATH.to_string();
                e.meta.updated = now;
            }
        }
        Ok(())
    }

    async fn reorder_folders(
        &self,
        parent: Option<&str>,
        ordered_ids: &[String],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let slot = MemoryState::children_of(&mut state.folders, parent)
            .ok_or_else(|| Self::err("reorder_folders", "parent folder not found"))?;
        let mut reordered = Vec::with_capacity(slot.len());
        for id in ordered_ids {
            if let Some(pos) = slot.iter().position(|n| n.id == *id) {
                reordered.push(slot.remove(pos));
            }
        }
        reordered.append(slot);
        *slot = reordered;
        // Sibling order is encoded in the rank prefix of each path, so a
        // reorder rewrites paths too.
        let renumbered: Vec<(String, String)> = slot
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let (base, leaf) = split_path(&node.path);
                let slug = leaf.split_once('-').map(|(_, s)| s).unwrap_or(leaf);
                (node.path.clone(), format!("{base}/{:06}-{slug}", i + 1))
            })
            .collect();
        for (old, new) in renumbered {
            if old != new {
                let mut node = MemoryState::remove_folder(&mut state.folders, &old)
                    .expect("folder present during renumbering");
                state.rewrite_paths(&mut node, new);
                let slot = MemoryState::children_of(&mut state.folders, parent)
                    .expect("parent present during renumbering");
                slot.push(node);
            }
        }
        // Untouched siblings stayed in place while renumbered ones were
        // re-appended; the zero-padded prefix restores the true order.
        if let Some(slot) = MemoryState::children_of(&mut state.folders, parent) {
            slot.sort_by(|a, b| a.path.cmp(&b.path));
        }
        Ok(())
    }

    async fn move_folder(&self, path: &str, new_parent: Option<&str>) -> BackendResult<()> {
        let mut state = self.state.lock();
        // Validate the target before touching anything so a rejected move
        // leaves no partial state.
        if let Some(parent) = new_parent {
            if parent == path || parent.starts_with(&format!("{path}/")) {
                return Err(Self::err("move_folder", "cannot move a folder into itself"));
            }
            if MemoryState::find_folder_mut(&mut state.folders, parent).is_none() {
                return Err(Self::err("move_folder", "target parent not found"));
            }
        }
        let mut node = MemoryState::remove_folder(&mut state.folders, path)
            .ok_or_else(|| Self::err("move_folder", format!("folder {path} not found")))?;
        state.folder_seq += 1;
        let base = new_parent.unwrap_or(ROOT_FOLDER);
        let (_, leaf) = split_path(path);
        let slug = leaf.split_once('-').map(|(_, s)| s).unwrap_or(leaf);
        let seq = state.folder_seq;
        state.rewrite_paths(&mut node, format!("{base}/{seq:06}-{slug}"));
        let slot = MemoryState::children_of(&mut state.folders, new_parent)
            .expect("target parent validated above");
        slot.push(node);
        Ok(())
    }

    async fn list_trash(&self, kind: EntityKind) -> BackendResult<Vec<TrashItem>> {
        let state = self.state.lock();
        let mut items: Vec<TrashItem> = state
            .entities
            .iter()
            .filter(|e| e.meta.kind == kind && e.meta.folder_path == TRASH_PATH)
            .map(|e| TrashItem {
                id: e.meta.id.clone(),
                kind: e.meta.kind,
                title: e.meta.title.clone(),
                color: e.meta.color.clone(),
                pinned: e.meta.pinned,
                tags: e.meta.tags.clone(),
                status: e.meta.status,
                due: e.meta.due,
                created: e.meta.created,
                updated: e.meta.updated,
            })
            .collect();
        items.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(items)
    }

    async fn trash_counts(&self) -> BackendResult<TrashCounts> {
        let state = self.state.lock();
        let mut counts = TrashCounts::default();
        for e in state.entities.iter() {
            if e.meta.folder_path != TRASH_PATH {
                continue;
            }
            match e.meta.kind {
                EntityKind::Note => counts.notes += 1,
                EntityKind::Task => counts.tasks += 1,
            }
        }
        counts.total = counts.notes + counts.tasks + counts.passwords;
        Ok(counts)
    }

    async fn empty_trash(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.entities.retain(|e| e.meta.folder_path != TRASH_PATH);
        Ok(())
    }

    async fn restore_all_trash(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        let trashed: Vec<usize> = state
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.meta.folder_path == TRASH_PATH)
            .map(|(i, _)| i)
            .collect();
        for idx in trashed {
            let target = state.entities[idx]
                .restore_path
                .take()
                .unwrap_or_else(|| ROOT_FOLDER.to_string());
            let kind = state.entities[idx].meta.kind;
            let status = state.entities[idx].meta.status;
            let rank = state.next_rank(kind, &target, status);
            let entry = &mut state.entities[idx];
            entry.meta.folder_path = target;
            entry.meta.rank = rank;
            entry.meta.updated = now_millis();
        }
        Ok(())
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}
