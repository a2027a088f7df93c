//! Client-side board state.
//!
//! A [`ClientBoard`] keeps two copies of one board: the last state the
//! server confirmed and the view the user sees. Local drags change only the
//! view. A successful commit promotes the view, a failed one reverts it.
//! Events received from the bus are applied to both copies through the same
//! reducer, so every item stays in exactly one bucket whatever order drags
//! and events arrive in.

use super::events::{BoardEvent, ItemEvent, ItemUpdate, Removal, RoutedEvent};
use super::models::{Board, BoardItem, BoardKind, Issue, Project};
use super::ordering::{BoardDrag, DragMove, OrderingError, plan_move};

#[derive(Debug, Clone)]
pub struct ClientBoard<T: BoardItem> {
    confirmed: Board<T>,
    view: Board<T>,
}

impl<T: BoardItem> ClientBoard<T> {
    pub fn new(board: Board<T>) -> Self {
        Self {
            confirmed: board.clone(),
            view: board,
        }
    }

    /// What the user currently sees.
    pub fn view(&self) -> &Board<T> {
        &self.view
    }

    /// The last server-confirmed state.
    pub fn confirmed(&self) -> &Board<T> {
        &self.confirmed
    }

    /// True while an optimistic change awaits confirmation.
    pub fn has_pending(&self) -> bool {
        self.view != self.confirmed
    }

    /// Apply a drag to the view and return the board to submit, or `None`
    /// for a drop onto the same slot.
    pub fn drag(&mut self, mv: &DragMove<T::Status>) -> Result<Option<Board<T>>, OrderingError> {
        match plan_move(&self.view, mv)? {
            Some(plan) => {
                self.view = plan.board;
                Ok(Some(self.view.clone()))
            }
            None => Ok(None),
        }
    }

    pub fn confirm(&mut self) {
        self.confirmed = self.view.clone();
    }

    pub fn rollback(&mut self) {
        self.view = self.confirmed.clone();
    }

    pub fn apply(&mut self, event: &ItemEvent<T>) {
        reduce(&mut self.confirmed, event);
        reduce(&mut self.view, event);
    }
}

/// Fold one event into a board.
pub fn reduce<T: BoardItem>(board: &mut Board<T>, event: &ItemEvent<T>) {
    match event {
        ItemEvent::Created(item) => {
            remove(board, item.id());
            let status = item.status();
            board.bucket_mut(status).push(item.clone());
            board.renumber(status);
        }
        ItemEvent::Updated(update) => apply_update(board, update),
        ItemEvent::Deleted(Removal { id, status }) => {
            let bucket = board.bucket_mut(*status);
            let before = bucket.len();
            bucket.retain(|i| i.id() != *id);
            if bucket.len() == before {
                remove(board, *id);
            } else {
                board.renumber(*status);
            }
        }
        ItemEvent::DraggedAndDropped(settled) => *board = settled.clone(),
    }
}

fn apply_update<T: BoardItem>(board: &mut Board<T>, update: &ItemUpdate<T>) {
    let item = &update.updated;
    if !update.status_changed {
        if let Some((status, idx)) = board.locate(item.id())
            && status == item.status()
        {
            board.bucket_mut(status)[idx] = item.clone();
            board.renumber(status);
            return;
        }
    }
    remove(board, item.id());
    let status = update.new_status;
    let bucket = board.bucket_mut(status);
    let at = usize::try_from(item.order()).unwrap_or(0).min(bucket.len());
    bucket.insert(at, item.clone());
    board.renumber(status);
}

/// Remove `id` from whichever bucket holds it and close the gap.
fn remove<T: BoardItem>(board: &mut Board<T>, id: i64) {
    if let Some((status, idx)) = board.locate(id) {
        board.bucket_mut(status).remove(idx);
        board.renumber(status);
    }
}

/// A board waiting to be committed after a local drag.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCommit {
    Issues(Board<Issue>),
    Projects(Board<Project>),
}

impl PendingCommit {
    pub fn kind(&self) -> BoardKind {
        match self {
            Self::Issues(_) => BoardKind::Issues,
            Self::Projects(_) => BoardKind::Projects,
        }
    }
}

/// Both boards of one workspace as a browser tab holds them.
#[derive(Debug, Clone)]
pub struct WorkspaceView {
    pub workspace_id: i64,
    pub issues: ClientBoard<Issue>,
    pub projects: ClientBoard<Project>,
}

impl WorkspaceView {
    pub fn new(workspace_id: i64, issues: Board<Issue>, projects: Board<Project>) -> Self {
        Self {
            workspace_id,
            issues: ClientBoard::new(issues),
            projects: ClientBoard::new(projects),
        }
    }

    pub fn on_drag_end(&mut self, drag: BoardDrag) -> Result<Option<PendingCommit>, OrderingError> {
        Ok(match drag {
            BoardDrag::Issues(mv) => self.issues.drag(&mv)?.map(PendingCommit::Issues),
            BoardDrag::Projects(mv) => self.projects.drag(&mv)?.map(PendingCommit::Projects),
        })
    }

    /// Settle a commit: confirm it when `succeeded`, otherwise revert the
    /// board to its last confirmed state.
    pub fn settle(&mut self, kind: BoardKind, succeeded: bool) {
        match (kind, succeeded) {
            (BoardKind::Issues, true) => self.issues.confirm(),
            (BoardKind::Issues, false) => self.issues.rollback(),
            (BoardKind::Projects, true) => self.projects.confirm(),
            (BoardKind::Projects, false) => self.projects.rollback(),
        }
    }

    pub fn apply(&mut self, event: BoardEvent) {
        match event.route() {
            RoutedEvent::Issues(e) => self.issues.apply(&e),
            RoutedEvent::Projects(e) => self.projects.apply(&e),
        }
    }
}
