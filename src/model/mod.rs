use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Reserved folder path marking soft-deleted entities. Entities under this
/// path are excluded from normal listings but remain enumerable via trash
/// operations until purged or restored.
pub const TRASH_PATH: &str = ".trash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Note,
    Task,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    Doing,
    Done,
    Archived,
}

/// Position, size and visibility of a detached floating view of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatWindow {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub show: bool,
}

impl FloatWindow {
    /// A window that was never placed has zero extent.
    pub fn is_unset(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }
}

/// Entity metadata as returned by the backend. The content body is fetched
/// separately and lazily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub id: String,
    pub kind: EntityKind,
    pub title: String,
    pub rank: u32,
    pub color: String,
    pub pinned: bool,
    pub tags: Vec<String>,
    pub created: i64,
    pub updated: i64,
    pub folder_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<i64>,
    pub float: FloatWindow,
}

/// In-memory entity record: metadata plus the (possibly still empty) content
/// body joined from the content cache.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub title: String,
    pub rank: u32,
    pub color: String,
    pub pinned: bool,
    pub tags: Vec<String>,
    pub created: i64,
    pub updated: i64,
    pub folder_path: String,
    pub status: Option<TaskStatus>,
    pub due: Option<i64>,
    pub float: FloatWindow,
    pub content: String,
}

impl EntityRecord {
    pub fn from_meta(meta: EntityMeta, content: String) -> Self {
        Self {
            id: meta.id,
            kind: meta.kind,
            title: meta.title,
            rank: meta.rank,
            color: meta.color,
            pinned: meta.pinned,
            tags: meta.tags,
            created: meta.created,
            updated: meta.updated,
            folder_path: meta.folder_path,
            status: meta.status,
            due: meta.due,
            float: meta.float,
            content,
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.folder_path == TRASH_PATH
    }
}

/// Listing scope: which kind, optionally narrowed to one folder and (for
/// tasks) one status bucket. Rank ordering is dense within a
/// (folder, status) bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl Scope {
    pub fn all(kind: EntityKind) -> Self {
        Self {
            kind,
            folder: None,
            status: None,
        }
    }

    pub fn folder(kind: EntityKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            folder: Some(path.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether a record falls inside this scope. Trashed entities only match
    /// when the scope explicitly targets the trash path.
    pub fn contains(&self, record: &EntityRecord) -> bool {
        if record.kind != self.kind {
            return false;
        }
        match &self.folder {
            Some(folder) => {
                if record.folder_path != *folder {
                    return false;
                }
            }
            None => {
                if record.is_trashed() {
                    return false;
                }
            }
        }
        match self.status {
            Some(status) => record.status == Some(status),
            None => true,
        }
    }
}

/// A single field of an update payload: either left alone or explicitly set.
/// `Set` on an `Option` field expresses a deliberate clear, which a bare
/// `Option` cannot distinguish from "not specified".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Patch::Keep => None,
            Patch::Set(value) => Some(value),
        }
    }

    /// Overwrite `slot` when this patch carries a value.
    pub fn apply_to(self, slot: &mut T) {
        if let Patch::Set(value) = self {
            *slot = value;
        }
    }
}

/// Partial geometry update. Merged over the entity's full current geometry
/// before anything is sent to the backend, so unspecified fields are never
/// blanked out.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FloatPatch {
    pub x: Patch<f64>,
    pub y: Patch<f64>,
    pub w: Patch<f64>,
    pub h: Patch<f64>,
    pub show: Patch<bool>,
}

impl FloatPatch {
    /// A patch carrying the complete tuple, for writes that must never send
    /// partial geometry.
    pub fn set_all(window: FloatWindow) -> Self {
        Self {
            x: Patch::Set(window.x),
            y: Patch::Set(window.y),
            w: Patch::Set(window.w),
            h: Patch::Set(window.h),
            show: Patch::Set(window.show),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.x.is_set()
            || self.y.is_set()
            || self.w.is_set()
            || self.h.is_set()
            || self.show.is_set())
    }

    pub fn merge_over(&self, base: FloatWindow) -> FloatWindow {
        let mut merged = base;
        self.x.apply_to(&mut merged.x);
        self.y.apply_to(&mut merged.y);
        self.w.apply_to(&mut merged.w);
        self.h.apply_to(&mut merged.h);
        self.show.apply_to(&mut merged.show);
        merged
    }

    /// Merge `newer` on top of this patch, field by field.
    pub fn absorb(&mut self, newer: FloatPatch) {
        if newer.x.is_set() {
            self.x = newer.x;
        }
        if newer.y.is_set() {
            self.y = newer.y;
        }
        if newer.w.is_set() {
            self.w = newer.w;
        }
        if newer.h.is_set() {
            self.h = newer.h;
        }
        if newer.show.is_set() {
            self.show = newer.show;
        }
    }
}

/// Input for entity creation. Identity is assigned by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntity {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<i64>,
}

/// Field-wise entity update.
#[derive(Debug, Clone, Default)]
pub struct UpdateEntity {
    pub id: String,
    pub title: Patch<String>,
    pub content: Patch<String>,
    pub color: Patch<String>,
    pub pinned: Patch<bool>,
    pub tags: Patch<Vec<String>>,
    pub status: Patch<TaskStatus>,
    pub due: Patch<Option<i64>>,
    pub float: FloatPatch,
}

impl UpdateEntity {
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// One node of the folder tree. `path` is hierarchical and globally unique;
/// the parent path is derived during flattening, not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    pub id: String,
    pub name: String,
    pub path: String,
    pub pinned: bool,
    pub favorite: bool,
    pub color: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub children: Vec<FolderNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolder {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Field-wise folder metadata update. Structural changes (rename, reorder,
/// move) go through their own operations because they shift paths.
#[derive(Debug, Clone, Default)]
pub struct FolderPatch {
    pub pinned: Patch<bool>,
    pub favorite: Patch<bool>,
    pub color: Patch<String>,
    pub icon: Patch<String>,
}

/// Soft-deleted entity as listed by the trash surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashItem {
    pub id: String,
    pub kind: EntityKind,
    pub title: String,
    pub color: String,
    pub pinned: bool,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<i64>,
    pub created: i64,
    pub updated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrashCounts {
    pub notes: usize,
    pub tasks: usize,
    pub passwords: usize,
    pub total: usize,
}

/// Wall-clock epoch milliseconds, the timestamp unit used on the wire.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
