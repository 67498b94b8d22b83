//! Pure lookups over a folder-tree snapshot. Recomputed from the latest
//! fetched tree on every call; there is no cached index that could go stale.

use crate::model::FolderNode;

/// One folder of the flattened tree, annotated with its parent's path.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatFolder {
    pub id: String,
    pub name: String,
    pub path: String,
    pub parent_path: Option<String>,
    pub depth: usize,
    pub pinned: bool,
    pub favorite: bool,
    pub color: String,
}

pub fn find_by_id<'a>(nodes: &'a [FolderNode], id: &str) -> Option<&'a FolderNode> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_by_id(&node.children, id) {
            return Some(found);
        }
    }
    None
}

/// Depth-first search returning the first node with a matching path.
pub fn find_by_path<'a>(nodes: &'a [FolderNode], path: &str) -> Option<&'a FolderNode> {
    for node in nodes {
        if node.path == path {
            return Some(node);
        }
        if let Some(found) = find_by_path(&node.children, path) {
            return Some(found);
        }
    }
    None
}

/// Pre-order flattening of the tree.
pub fn flatten(nodes: &[FolderNode]) -> Vec<FlatFolder> {
    let mut out = Vec::new();
    flatten_into(nodes, None, 0, &mut out);
    out
}

fn flatten_into(
    nodes: &[FolderNode],
    parent_path: Option<&str>,
    depth: usize,
    out: &mut Vec<FlatFolder>,
) {
    for node in nodes {
        out.push(FlatFolder {
            id: node.id.clone(),
            name: node.name.clone(),
            path: node.path.clone(),
            parent_path: parent_path.map(str::to_string),
            depth,
            pinned: node.pinned,
            favorite: node.favorite,
            color: node.color.clone(),
        });
        flatten_into(&node.children, Some(&node.path), depth + 1, out);
    }
}

/// Root-to-node ancestor chain for a path, or empty when the path does not
/// exist in the snapshot.
pub fn breadcrumbs<'a>(nodes: &'a [FolderNode], path: &str) -> Vec<&'a FolderNode> {
    let mut chain = Vec::new();
    if walk_breadcrumbs(nodes, path, &mut chain) {
        chain
    } else {
        Vec::new()
    }
}

fn walk_breadcrumbs<'a>(
    nodes: &'a [FolderNode],
    path: &str,
    chain: &mut Vec<&'a FolderNode>,
) -> bool {
    for node in nodes {
        chain.push(node);
        if node.path == path || walk_breadcrumbs(&node.children, path, chain) {
            return true;
        }
        chain.pop();
    }
    false
}
