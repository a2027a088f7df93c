//! End-to-end board synchronization: gateway, event bus and client boards
//! working together the way connected browser tabs use them.

use std::sync::Arc;
use std::time::Duration;

use linboard::board::client::{PendingCommit, WorkspaceView};
use linboard::board::db::{BoardDb, DbHandle};
use linboard::board::events::{BoardEvent, EventBus, EventStream, MemoryEventBus};
use linboard::board::gateway::{CreateIssue, Gateway};
use linboard::board::models::{BoardKind, IssueStatus};
use linboard::board::ordering::{BoardDrag, DragMove, Slot};
use linboard::board::permissions::Caller;
use linboard::config::CommitMode;
use linboard::errors::BoardError;
use tokio_stream::StreamExt;

struct Tab {
    view: WorkspaceView,
    events: EventStream,
}

impl Tab {
    async fn open(gw: &Gateway, bus: &MemoryEventBus, caller: &Caller, workspace_id: i64) -> Self {
        let events = bus.subscribe(workspace_id).await.unwrap();
        let issues = gw.issue_board(caller, workspace_id).await.unwrap();
        let projects = gw.project_board(caller, workspace_id).await.unwrap();
        Self {
            view: WorkspaceView::new(workspace_id, issues, projects),
            events,
        }
    }

    /// Apply every event received so far.
    async fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(30), self.events.next()).await
        {
            self.view.apply(event);
            applied += 1;
        }
        applied
    }
}

async fn setup(mode: CommitMode) -> (Gateway, Arc<MemoryEventBus>, Caller, Caller, i64) {
    let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
    let bus = Arc::new(MemoryEventBus::new());
    let gw = Gateway::new(db, bus.clone()).with_commit_mode(mode);
    let alice = Caller::new("alice");
    let bob = Caller::new("bob");
    let ws = gw.create_workspace(&alice, "Launch team").await.unwrap();
    gw.join_workspace(&bob, &ws.invite_code).await.unwrap();
    (gw, bus, alice, bob, ws.id)
}

async fn create(gw: &Gateway, caller: &Caller, ws: i64, title: &str, status: IssueStatus) -> i64 {
    gw.create_issue(
        caller,
        ws,
        CreateIssue {
            title: title.to_string(),
            content: String::new(),
            status,
            label: None,
            project_id: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn commit(gw: &Gateway, caller: &Caller, ws: i64, pending: PendingCommit) -> Result<(), BoardError> {
    match pending {
        PendingCommit::Issues(board) => gw.commit_issue_order(caller, ws, board).await.map(|_| ()),
        PendingCommit::Projects(board) => gw.commit_project_order(caller, ws, board).await.map(|_| ()),
    }
}

#[tokio::test]
async fn tabs_converge_after_drag() {
    let (gw, bus, alice, bob, ws) = setup(CommitMode::BestEffort).await;
    let mut tab_a = Tab::open(&gw, &bus, &alice, ws).await;
    let mut tab_b = Tab::open(&gw, &bus, &bob, ws).await;

    let a = create(&gw, &alice, ws, "A", IssueStatus::Todo).await;
    let b = create(&gw, &alice, ws, "B", IssueStatus::Todo).await;
    let c = create(&gw, &alice, ws, "C", IssueStatus::Todo).await;
    assert_eq!(tab_a.drain().await, 3);
    assert_eq!(tab_b.drain().await, 3);

    // Tab A drags C to the top of IN PROGRESS.
    let drag = BoardDrag::Issues(DragMove::new(
        Slot::new(IssueStatus::Todo, 2),
        Slot::new(IssueStatus::InProgress, 0),
    ));
    let pending = tab_a.view.on_drag_end(drag).unwrap().unwrap();
    let optimistic = tab_a.view.issues.view().clone();

    commit(&gw, &alice, ws, pending).await.unwrap();
    tab_a.view.settle(BoardKind::Issues, true);

    tab_a.drain().await;
    tab_b.drain().await;

    let server = gw.issue_board(&alice, ws).await.unwrap();
    // Same buckets as the optimistic guess; only timestamps were refreshed.
    assert_eq!(tab_a.view.issues.view().placements(), optimistic.placements());
    assert_eq!(tab_a.view.issues.view(), &server);
    assert_eq!(tab_b.view.issues.view(), &server);
    assert!(server.is_dense());

    let todo: Vec<i64> = server.bucket(IssueStatus::Todo).iter().map(|i| i.id).collect();
    assert_eq!(todo, vec![a, b]);
    assert_eq!(server.bucket(IssueStatus::InProgress)[0].id, c);
}

#[tokio::test]
async fn failed_commit_rolls_back_view() {
    let (gw, bus, alice, bob, ws) = setup(CommitMode::Atomic).await;
    create(&gw, &alice, ws, "Alice's", IssueStatus::Backlog).await;
    let mut tab_b = Tab::open(&gw, &bus, &bob, ws).await;

    let drag = BoardDrag::Issues(DragMove::new(
        Slot::new(IssueStatus::Backlog, 0),
        Slot::new(IssueStatus::Done, 0),
    ));
    let pending = tab_b.view.on_drag_end(drag).unwrap().unwrap();
    assert!(tab_b.view.issues.has_pending());

    let err = commit(&gw, &bob, ws, pending).await.unwrap_err();
    assert!(matches!(err, BoardError::PermissionDenied));
    tab_b.view.settle(BoardKind::Issues, false);

    assert_eq!(tab_b.drain().await, 0);
    let server = gw.issue_board(&alice, ws).await.unwrap();
    assert_eq!(tab_b.view.issues.view(), &server);
}

#[tokio::test]
async fn status_change_and_delete_reach_other_tabs() {
    let (gw, bus, alice, bob, ws) = setup(CommitMode::BestEffort).await;
    let a = create(&gw, &alice, ws, "A", IssueStatus::Todo).await;
    let b = create(&gw, &alice, ws, "B", IssueStatus::Todo).await;
    let mut tab_b = Tab::open(&gw, &bus, &bob, ws).await;

    gw.update_issue(
        &alice,
        ws,
        a,
        linboard::board::models::IssuePatch {
            status: Some(IssueStatus::Done),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    gw.delete_issue(&alice, ws, b).await.unwrap();
    assert_eq!(tab_b.drain().await, 2);

    let server = gw.issue_board(&alice, ws).await.unwrap();
    assert_eq!(tab_b.view.issues.view().placements(), server.placements());
    assert!(tab_b.view.issues.view().bucket(IssueStatus::Todo).is_empty());
}

#[tokio::test]
async fn events_stay_in_their_workspace() {
    let (gw, bus, alice, _bob, ws) = setup(CommitMode::BestEffort).await;
    let other = gw.create_workspace(&alice, "Side project").await.unwrap();
    let mut tab = Tab::open(&gw, &bus, &alice, ws).await;

    create(&gw, &alice, other.id, "Elsewhere", IssueStatus::Todo).await;
    assert_eq!(tab.drain().await, 0);

    // Published events carry their wire names.
    let mut events = bus.subscribe(ws).await.unwrap();
    create(&gw, &alice, ws, "Here", IssueStatus::Todo).await;
    let event = events.next().await.unwrap();
    assert_eq!(event.name(), "issue-created");
    assert!(matches!(event, BoardEvent::IssueCreated(_)));
}
