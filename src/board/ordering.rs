//! Drag-and-drop ordering engine.
//!
//! Given a bucketed board and a move descriptor, computes the new board and
//! the per-item `(id, order[, status])` rewrites needed to restore a dense
//! `0..n-1` ordering in every affected bucket. Pure functions only; the
//! gateway and the client board both drive this.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{Board, BoardItem, BucketKey, IssueStatus, ProjectStatus};

/// A position on the board: a status bucket and a list index in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot<S> {
    pub status: S,
    pub index: usize,
}

impl<S> Slot<S> {
    pub fn new(status: S, index: usize) -> Self {
        Self { status, index }
    }
}

/// Result of a drag gesture within one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragMove<S> {
    pub source: Slot<S>,
    pub destination: Slot<S>,
}

impl<S: PartialEq> DragMove<S> {
    pub fn new(source: Slot<S>, destination: Slot<S>) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.source == self.destination
    }
}

/// A drag on either board of a workspace, each kind with its own columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoardDrag {
    Issues(DragMove<IssueStatus>),
    Projects(DragMove<ProjectStatus>),
}

/// One persisted rewrite. `status` is set only for the item that changed
/// bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWrite<S> {
    pub id: i64,
    pub order: i32,
    pub status: Option<S>,
}

/// The board after a move together with the writes that produce it.
#[derive(Debug, Clone)]
pub struct MovePlan<T: BoardItem> {
    pub board: Board<T>,
    pub writes: Vec<OrderWrite<T::Status>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("No item at index {index} of {status}")]
    SourceOutOfRange { status: String, index: usize },

    #[error("Cannot insert at index {index} of {status}")]
    DestinationOutOfRange { status: String, index: usize },
}

/// Apply `mv` to `board`.
///
/// Returns `Ok(None)` when source and destination are the same slot. The
/// returned writes cover every item whose `(order, status)` changed, in
/// source-bucket then destination-bucket order.
pub fn plan_move<T: BoardItem>(
    board: &Board<T>,
    mv: &DragMove<T::Status>,
) -> Result<Option<MovePlan<T>>, OrderingError> {
    if mv.is_noop() {
        return Ok(None);
    }

    let (src, dst) = (mv.source, mv.destination);
    let src_len = board.bucket(src.status).len();
    if src.index >= src_len {
        return Err(OrderingError::SourceOutOfRange {
            status: src.status.name().to_string(),
            index: src.index,
        });
    }
    // Within one bucket the list shrinks by one before re-insertion.
    let dst_len = if src.status == dst.status {
        src_len - 1
    } else {
        board.bucket(dst.status).len()
    };
    if dst.index > dst_len {
        return Err(OrderingError::DestinationOutOfRange {
            status: dst.status.name().to_string(),
            index: dst.index,
        });
    }

    let mut next = board.clone();
    let moved = next.bucket_mut(src.status).remove(src.index);
    let moved_id = moved.id();
    next.bucket_mut(dst.status).insert(dst.index, moved);

    next.renumber(src.status);
    if src.status != dst.status {
        next.renumber(dst.status);
    }

    let mut writes = Vec::new();
    let touched = if src.status == dst.status {
        vec![src.status]
    } else {
        vec![src.status, dst.status]
    };
    for status in touched {
        for item in next.bucket(status) {
            let before = board.get(item.id());
            let changed = before
                .map(|b| b.order() != item.order() || b.status() != item.status())
                .unwrap_or(true);
            if changed {
                writes.push(OrderWrite {
                    id: item.id(),
                    order: item.order(),
                    status: (item.id() == moved_id && src.status != dst.status)
                        .then_some(status),
                });
            }
        }
    }

    Ok(Some(MovePlan {
        board: next,
        writes,
    }))
}

/// Re-derive `(status, order)` of every item from its bucket and list
/// position, as the server does with a submitted board.
pub fn normalize<T: BoardItem>(board: &Board<T>) -> Board<T> {
    let mut next = board.clone();
    next.renumber_all();
    next
}
