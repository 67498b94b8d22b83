use std::cell::RefCell;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::model::{EntityKind, FloatWindow};

/// Broadcast notification emitted after a backend call succeeded. Fire and
/// forget: consumers that fell behind or disconnected are dropped, never
/// waited on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    EntityUpdated {
        kind: EntityKind,
        id: String,
    },
    EntityDeleted {
        kind: EntityKind,
        id: String,
    },
    EntityPositionChanged {
        kind: EntityKind,
        id: String,
        float: FloatWindow,
    },
    EntityHidden {
        kind: EntityKind,
        id: String,
    },
    TrashEmptied,
    TrashRestored,
    FolderDeleted {
        path: String,
    },
}

/// Fan-out of [`Notification`]s to any number of subscribers, e.g. detached
/// views reacting to their entity being deleted elsewhere.
#[derive(Debug, Default)]
pub struct Notifier {
    senders: RefCell<Vec<Sender<Notification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = unbounded();
        self.senders.borrow_mut().push(tx);
        rx
    }

    pub fn emit(&self, notification: Notification) {
        self.senders
            .borrow_mut()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}
