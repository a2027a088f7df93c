//! Realtime fan-out of board mutations.
//!
//! The gateway publishes a [`BoardEvent`] to the workspace channel after each
//! successful mutation; every subscriber of that workspace receives it.
//! Delivery is at-most-once: late subscribers miss earlier events and a
//! lagging subscriber silently skips what it fell behind on.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::models::{Board, BoardItem, BoardKind, Issue, IssueStatus, Project, ProjectStatus};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Payload of an `*-updated` event.
///
/// Serialized as `{updatedIssue|updatedProject, statusChanged, prevStatus,
/// newStatus}` so subscribers can move the card between buckets without a
/// full refresh.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = ""))]
pub struct ItemUpdate<T: BoardItem> {
    #[serde(alias = "updatedIssue", alias = "updatedProject")]
    pub updated: T,
    pub status_changed: bool,
    pub prev_status: T::Status,
    pub new_status: T::Status,
}

impl<T: BoardItem> ItemUpdate<T> {
    pub fn new(prev_status: T::Status, updated: T) -> Self {
        let new_status = updated.status();
        Self {
            status_changed: prev_status != new_status,
            prev_status,
            new_status,
            updated,
        }
    }
}

impl<T: BoardItem> Serialize for ItemUpdate<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let updated_field = match T::KIND {
            BoardKind::Issues => "updatedIssue",
            BoardKind::Projects => "updatedProject",
        };
        let mut state = serializer.serialize_struct("ItemUpdate", 4)?;
        state.serialize_field(updated_field, &self.updated)?;
        state.serialize_field("statusChanged", &self.status_changed)?;
        state.serialize_field("prevStatus", &self.prev_status)?;
        state.serialize_field("newStatus", &self.new_status)?;
        state.end()
    }
}

/// Payload of a `*-deleted` event: the bucket to remove the id from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal<S> {
    pub id: i64,
    pub status: S,
}

/// Every event carried on a workspace channel.
///
/// Wire format is `{"type": "issue-created", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum BoardEvent {
    IssueCreated(Issue),
    IssueUpdated(ItemUpdate<Issue>),
    IssueDeleted(Removal<IssueStatus>),
    IssueDraggedAndDropped(Board<Issue>),
    ProjectCreated(Project),
    ProjectUpdated(ItemUpdate<Project>),
    ProjectDeleted(Removal<ProjectStatus>),
    ProjectDraggedAndDropped(Board<Project>),
}

/// Board-agnostic view of one event, for code generic over issues and
/// projects.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent<T: BoardItem> {
    Created(T),
    Updated(ItemUpdate<T>),
    Deleted(Removal<T::Status>),
    DraggedAndDropped(Board<T>),
}

/// A [`BoardEvent`] split by board kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    Issues(ItemEvent<Issue>),
    Projects(ItemEvent<Project>),
}

impl BoardEvent {
    /// Wire name, as found in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IssueCreated(_) => "issue-created",
            Self::IssueUpdated(_) => "issue-updated",
            Self::IssueDeleted(_) => "issue-deleted",
            Self::IssueDraggedAndDropped(_) => "issue-dragged-and-dropped",
            Self::ProjectCreated(_) => "project-created",
            Self::ProjectUpdated(_) => "project-updated",
            Self::ProjectDeleted(_) => "project-deleted",
            Self::ProjectDraggedAndDropped(_) => "project-dragged-and-dropped",
        }
    }

    pub fn route(self) -> RoutedEvent {
        match self {
            Self::IssueCreated(i) => RoutedEvent::Issues(ItemEvent::Created(i)),
            Self::IssueUpdated(u) => RoutedEvent::Issues(ItemEvent::Updated(u)),
            Self::IssueDeleted(r) => RoutedEvent::Issues(ItemEvent::Deleted(r)),
            Self::IssueDraggedAndDropped(b) => RoutedEvent::Issues(ItemEvent::DraggedAndDropped(b)),
            Self::ProjectCreated(p) => RoutedEvent::Projects(ItemEvent::Created(p)),
            Self::ProjectUpdated(u) => RoutedEvent::Projects(ItemEvent::Updated(u)),
            Self::ProjectDeleted(r) => RoutedEvent::Projects(ItemEvent::Deleted(r)),
            Self::ProjectDraggedAndDropped(b) => {
                RoutedEvent::Projects(ItemEvent::DraggedAndDropped(b))
            }
        }
    }
}

impl From<ItemEvent<Issue>> for BoardEvent {
    fn from(event: ItemEvent<Issue>) -> Self {
        match event {
            ItemEvent::Created(i) => Self::IssueCreated(i),
            ItemEvent::Updated(u) => Self::IssueUpdated(u),
            ItemEvent::Deleted(r) => Self::IssueDeleted(r),
            ItemEvent::DraggedAndDropped(b) => Self::IssueDraggedAndDropped(b),
        }
    }
}

impl From<ItemEvent<Project>> for BoardEvent {
    fn from(event: ItemEvent<Project>) -> Self {
        match event {
            ItemEvent::Created(p) => Self::ProjectCreated(p),
            ItemEvent::Updated(u) => Self::ProjectUpdated(u),
            ItemEvent::Deleted(r) => Self::ProjectDeleted(r),
            ItemEvent::DraggedAndDropped(b) => Self::ProjectDraggedAndDropped(b),
        }
    }
}

// ── Event bus ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// Stream of events for one workspace. Ends when the bus drops the channel.
pub type EventStream = Pin<Box<dyn Stream<Item = BoardEvent> + Send>>;

/// Per-workspace publish/subscribe.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver `event` to every current subscriber of `workspace_id`.
    /// Succeeds when nobody is listening.
    async fn publish(&self, workspace_id: i64, event: BoardEvent) -> Result<(), EventBusError>;

    async fn subscribe(&self, workspace_id: i64) -> Result<EventStream, EventBusError>;
}

/// Single-process bus: one tokio broadcast channel per workspace.
pub struct MemoryEventBus {
    channels: Arc<DashMap<i64, broadcast::Sender<BoardEvent>>>,
    capacity: usize,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on a workspace channel.
    pub fn subscriber_count(&self, workspace_id: i64) -> usize {
        self.channels
            .get(&workspace_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, workspace_id: i64, event: BoardEvent) -> Result<(), EventBusError> {
        let Some(tx) = self.channels.get(&workspace_id).map(|tx| tx.clone()) else {
            return Ok(());
        };
        if tx.send(event).is_err() {
            // Every subscriber is gone; drop the channel.
            self.channels
                .remove_if(&workspace_id, |_, tx| tx.receiver_count() == 0);
        }
        Ok(())
    }

    async fn subscribe(&self, workspace_id: i64) -> Result<EventStream, EventBusError> {
        let capacity = self.capacity;
        // Subscribe while holding the entry so a concurrent prune cannot
        // orphan this receiver.
        let rx = self
            .channels
            .entry(workspace_id)
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();

        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());
        Ok(Box::pin(stream))
    }
}
