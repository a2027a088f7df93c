//! Mutation gateway.
//!
//! The only path through which board state changes. Every operation loads
//! the records it touches, checks the caller against them, persists through
//! [`DbHandle`], and only then publishes a [`BoardEvent`]. Failed lookups and
//! failed permission checks never reach the bus.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::assistant::{self, TextGenerator};
use super::db::{BoardDb, DbHandle, NewIssue, NewProject, StoredItem};
use super::events::{BoardEvent, EventBus, ItemEvent, ItemUpdate, Removal};
use super::models::*;
use super::permissions::Caller;
use crate::config::CommitMode;
use crate::errors::BoardError;

pub type GatewayResult<T> = Result<T, BoardError>;

/// Minimum length of workspace names and project summaries.
const MIN_NAME_LEN: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIssue {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub status: IssueStatus,
    #[serde(default)]
    pub label: Option<Label>,
    #[serde(default)]
    pub project_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProject {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub content: String,
    pub status: ProjectStatus,
    #[serde(default)]
    pub label: Option<Label>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Per-kind authorization and event wrapping used by the generic paths.
pub trait Guarded: StoredItem {
    fn not_found(id: i64) -> BoardError;
    fn can_edit(caller: &Caller, item: &Self) -> bool;
    fn can_delete(caller: &Caller, item: &Self) -> bool;
    fn into_event(event: ItemEvent<Self>) -> BoardEvent;
}

impl Guarded for Issue {
    fn not_found(id: i64) -> BoardError {
        BoardError::IssueNotFound { id }
    }
    fn can_edit(caller: &Caller, item: &Self) -> bool {
        caller.can_edit_issue(item)
    }
    fn can_delete(caller: &Caller, item: &Self) -> bool {
        caller.can_edit_issue(item)
    }
    fn into_event(event: ItemEvent<Self>) -> BoardEvent {
        event.into()
    }
}

impl Guarded for Project {
    fn not_found(id: i64) -> BoardError {
        BoardError::ProjectNotFound { id }
    }
    fn can_edit(caller: &Caller, item: &Self) -> bool {
        caller.can_edit_project(item)
    }
    fn can_delete(caller: &Caller, item: &Self) -> bool {
        caller.can_delete_project(item)
    }
    fn into_event(event: ItemEvent<Self>) -> BoardEvent {
        event.into()
    }
}

pub struct Gateway {
    db: DbHandle,
    bus: Arc<dyn EventBus>,
    commit_mode: CommitMode,
    assistant: Option<Arc<dyn TextGenerator>>,
}

impl Gateway {
    pub fn new(db: DbHandle, bus: Arc<dyn EventBus>) -> Self {
        Self {
            db,
            bus,
            commit_mode: CommitMode::default(),
            assistant: None,
        }
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_assistant(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.assistant = Some(generator);
        self
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    async fn publish(&self, workspace_id: i64, event: BoardEvent) {
        let name = event.name();
        match self.bus.publish(workspace_id, event).await {
            Ok(()) => debug!(workspace_id, event = name, "Published board event"),
            Err(e) => warn!(workspace_id, event = name, "Failed to publish board event: {}", e),
        }
    }

    // ── Workspaces ────────────────────────────────────────────────────

    pub async fn create_workspace(&self, caller: &Caller, name: &str) -> GatewayResult<Workspace> {
        let name = validate_name(name, "workspace name")?;
        let owner = caller.user_id.clone();
        let invite_code = Uuid::new_v4().to_string();
        let workspace = self
            .db
            .call(move |db| -> GatewayResult<_> {
                Ok(db.create_workspace(&name, &owner, &invite_code)?)
            })
            .await?;
        info!(workspace_id = workspace.id, owner = %workspace.owner_id, "Workspace created");
        Ok(workspace)
    }

    pub async fn get_workspace(&self, caller: &Caller, id: i64) -> GatewayResult<Workspace> {
        let caller = caller.clone();
        self.db
            .call(move |db| load_member_workspace(db, &caller, id))
            .await
    }

    pub async fn list_workspaces(&self, caller: &Caller) -> GatewayResult<Vec<Workspace>> {
        let user = caller.user_id.clone();
        self.db
            .call(move |db| -> GatewayResult<_> { Ok(db.list_workspaces_for(&user)?) })
            .await
    }

    pub async fn update_workspace(
        &self,
        caller: &Caller,
        id: i64,
        name: &str,
    ) -> GatewayResult<Workspace> {
        let name = validate_name(name, "workspace name")?;
        let caller = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let workspace = load_workspace(db, id)?;
                ensure(caller.can_manage_workspace(&workspace), &caller, "rename workspace")?;
                Ok(db.rename_workspace(id, &name)?)
            })
            .await
    }

    pub async fn delete_workspace(&self, caller: &Caller, id: i64) -> GatewayResult<()> {
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let workspace = load_workspace(db, id)?;
                ensure(c.can_manage_workspace(&workspace), &c, "delete workspace")?;
                db.delete_workspace(id)?;
                Ok(())
            })
            .await?;
        info!(workspace_id = id, user = %caller.user_id, "Workspace deleted");
        Ok(())
    }

    /// Redeem an invite code. Joining twice is a no-op.
    pub async fn join_workspace(&self, caller: &Caller, invite_code: &str) -> GatewayResult<Workspace> {
        let code = invite_code.trim().to_string();
        let user = caller.user_id.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let workspace = db
                    .get_workspace_by_invite(&code)?
                    .ok_or(BoardError::InviteNotFound)?;
                if db.add_member(workspace.id, &user)? {
                    info!(workspace_id = workspace.id, user = %user, "Member joined workspace");
                }
                load_workspace(db, workspace.id)
            })
            .await
    }

    pub async fn remove_member(
        &self,
        caller: &Caller,
        id: i64,
        user_id: &str,
    ) -> GatewayResult<Workspace> {
        let caller = caller.clone();
        let user_id = user_id.to_string();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let workspace = load_workspace(db, id)?;
                ensure(caller.can_manage_workspace(&workspace), &caller, "remove member")?;
                if workspace.owner_id == user_id {
                    return Err(BoardError::Validation(
                        "the workspace owner cannot be removed".to_string(),
                    ));
                }
                db.remove_member(id, &user_id)?;
                load_workspace(db, id)
            })
            .await
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub async fn issue_board(&self, caller: &Caller, workspace_id: i64) -> GatewayResult<Board<Issue>> {
        self.load_board(caller, workspace_id).await
    }

    pub async fn project_board(
        &self,
        caller: &Caller,
        workspace_id: i64,
    ) -> GatewayResult<Board<Project>> {
        self.load_board(caller, workspace_id).await
    }

    async fn load_board<T: Guarded>(&self, caller: &Caller, workspace_id: i64) -> GatewayResult<Board<T>> {
        let caller = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                load_member_workspace(db, &caller, workspace_id)?;
                Ok(Board::from_items(T::load_all(db, workspace_id)?))
            })
            .await
    }

    // ── Issues ────────────────────────────────────────────────────────

    /// Append a new issue to the end of its status bucket.
    pub async fn create_issue(
        &self,
        caller: &Caller,
        workspace_id: i64,
        req: CreateIssue,
    ) -> GatewayResult<Issue> {
        let title = validate_text(&req.title, "title")?;
        let c = caller.clone();
        let issue = self
            .db
            .call(move |db| -> GatewayResult<_> {
                load_member_workspace(db, &c, workspace_id)?;
                if let Some(project_id) = req.project_id {
                    load_item::<Project>(db, workspace_id, project_id)?;
                }
                Ok(db.create_issue(&NewIssue {
                    workspace_id,
                    owner_id: c.user_id.clone(),
                    title,
                    content: req.content,
                    status: req.status,
                    label: req.label,
                    project_id: req.project_id,
                })?)
            })
            .await?;
        info!(workspace_id, issue_id = issue.id, status = issue.status.as_str(), "Issue created");
        self.publish(workspace_id, BoardEvent::IssueCreated(issue.clone()))
            .await;
        Ok(issue)
    }

    pub async fn get_issue(&self, caller: &Caller, workspace_id: i64, id: i64) -> GatewayResult<IssueDetail> {
        let caller = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                load_member_workspace(db, &caller, workspace_id)?;
                let issue: Issue = load_item(db, workspace_id, id)?;
                let comments = db.list_comments(id)?;
                Ok(IssueDetail { issue, comments })
            })
            .await
    }

    /// Persist the supplied fields. Publishes `issue-updated` unless the
    /// patch only moves `order`, which is a bulk-commit step.
    pub async fn update_issue(
        &self,
        caller: &Caller,
        workspace_id: i64,
        id: i64,
        patch: IssuePatch,
    ) -> GatewayResult<Issue> {
        if let Some(title) = &patch.title {
            validate_text(title, "title")?;
        }
        validate_order(patch.order)?;
        let c = caller.clone();
        let p = patch.clone();
        let (before, after) = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let issue: Issue = load_item(db, workspace_id, id)?;
                ensure(c.can_edit_issue(&issue), &c, "update issue")?;
                if p.is_empty() {
                    return Ok((issue.clone(), issue));
                }
                if let Some(Some(project_id)) = p.project_id {
                    load_item::<Project>(db, workspace_id, project_id)?;
                }
                let updated = db.update_issue(id, &p)?;
                Ok((issue, updated))
            })
            .await?;

        if !patch.is_empty() && !patch.is_order_only() {
            let update = ItemUpdate::new(before.status, after.clone());
            info!(
                workspace_id,
                issue_id = id,
                status_changed = update.status_changed,
                "Issue updated"
            );
            self.publish(workspace_id, BoardEvent::IssueUpdated(update))
                .await;
        }
        Ok(after)
    }

    pub async fn delete_issue(&self, caller: &Caller, workspace_id: i64, id: i64) -> GatewayResult<()> {
        self.delete_item::<Issue>(caller, workspace_id, id).await
    }

    /// Add or remove one assignee. Only the owner may do this; repeating the
    /// same change succeeds without publishing anything.
    pub async fn assign_issue(
        &self,
        caller: &Caller,
        workspace_id: i64,
        id: i64,
        user_id: &str,
        kind: AssignType,
    ) -> GatewayResult<Issue> {
        let c = caller.clone();
        let user = user_id.to_string();
        let (before, after) = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let workspace = load_workspace(db, workspace_id)?;
                let issue: Issue = load_item(db, workspace_id, id)?;
                ensure(c.can_assign_issue(&issue), &c, "assign issue")?;
                if kind == AssignType::Assign {
                    require_member(&workspace, &user)?;
                }
                match toggle(&issue.assigned_to, &user, kind) {
                    Some(next) => {
                        let updated = db.set_assignees(id, &next)?;
                        Ok((Some(issue), updated))
                    }
                    None => Ok((None, issue)),
                }
            })
            .await?;

        if let Some(before) = before {
            info!(workspace_id, issue_id = id, user = %user_id, ?kind, "Issue assignees changed");
            self.publish(
                workspace_id,
                BoardEvent::IssueUpdated(ItemUpdate::new(before.status, after.clone())),
            )
            .await;
        }
        Ok(after)
    }

    pub async fn commit_issue_order(
        &self,
        caller: &Caller,
        workspace_id: i64,
        board: Board<Issue>,
    ) -> GatewayResult<Board<Issue>> {
        self.commit_order(caller, workspace_id, board).await
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub async fn create_project(
        &self,
        caller: &Caller,
        workspace_id: i64,
        req: CreateProject,
    ) -> GatewayResult<Project> {
        let title = validate_text(&req.title, "title")?;
        let summary = validate_name(&req.summary, "summary")?;
        validate_dates(req.start_date, req.end_date)?;
        let c = caller.clone();
        let project = self
            .db
            .call(move |db| -> GatewayResult<_> {
                load_member_workspace(db, &c, workspace_id)?;
                Ok(db.create_project(&NewProject {
                    workspace_id,
                    owner_id: c.user_id.clone(),
                    title,
                    summary,
                    content: req.content,
                    status: req.status,
                    label: req.label,
                    start_date: req.start_date,
                    end_date: req.end_date,
                })?)
            })
            .await?;
        info!(workspace_id, project_id = project.id, status = project.status.as_str(), "Project created");
        self.publish(workspace_id, BoardEvent::ProjectCreated(project.clone()))
            .await;
        Ok(project)
    }

    pub async fn get_project(
        &self,
        caller: &Caller,
        workspace_id: i64,
        id: i64,
    ) -> GatewayResult<ProjectDetail> {
        let caller = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                load_member_workspace(db, &caller, workspace_id)?;
                let project: Project = load_item(db, workspace_id, id)?;
                let milestones = db.list_milestones(id)?;
                let completion_percent = project.completion_percent(Utc::now());
                Ok(ProjectDetail {
                    project,
                    milestones,
                    completion_percent,
                })
            })
            .await
    }

    /// Same event rules as [`Gateway::update_issue`]. Changing `lead` needs
    /// owner or lead rights, not just membership.
    pub async fn update_project(
        &self,
        caller: &Caller,
        workspace_id: i64,
        id: i64,
        patch: ProjectPatch,
    ) -> GatewayResult<Project> {
        if let Some(title) = &patch.title {
            validate_text(title, "title")?;
        }
        if let Some(summary) = &patch.summary {
            validate_name(summary, "summary")?;
        }
        validate_order(patch.order)?;
        let c = caller.clone();
        let p = patch.clone();
        let (before, after) = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let project: Project = load_item(db, workspace_id, id)?;
                ensure(c.can_edit_project(&project), &c, "update project")?;
                if p.is_empty() {
                    return Ok((project.clone(), project));
                }
                if let Some(lead) = &p.lead {
                    ensure(c.can_staff_project(&project), &c, "set project lead")?;
                    if let Some(lead) = lead {
                        require_member(&load_workspace(db, workspace_id)?, lead)?;
                    }
                }
                let start = p.start_date.unwrap_or(project.start_date);
                let end = p.end_date.unwrap_or(project.end_date);
                validate_dates(start, end)?;
                let updated = db.update_project(id, &p)?;
                Ok((project, updated))
            })
            .await?;

        if !patch.is_empty() && !patch.is_order_only() {
            let update = ItemUpdate::new(before.status, after.clone());
            info!(
                workspace_id,
                project_id = id,
                status_changed = update.status_changed,
                "Project updated"
            );
            self.publish(workspace_id, BoardEvent::ProjectUpdated(update))
                .await;
        }
        Ok(after)
    }

    pub async fn delete_project(&self, caller: &Caller, workspace_id: i64, id: i64) -> GatewayResult<()> {
        self.delete_item::<Project>(caller, workspace_id, id).await
    }

    /// Add or remove one project member. Owner or lead only; idempotent.
    pub async fn assign_project_member(
        &self,
        caller: &Caller,
        workspace_id: i64,
        id: i64,
        user_id: &str,
        kind: AssignType,
    ) -> GatewayResult<Project> {
        let c = caller.clone();
        let user = user_id.to_string();
        let (before, after) = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let workspace = load_workspace(db, workspace_id)?;
                let project: Project = load_item(db, workspace_id, id)?;
                ensure(c.can_staff_project(&project), &c, "assign project member")?;
                if kind == AssignType::Assign {
                    require_member(&workspace, &user)?;
                }
                match toggle(&project.members, &user, kind) {
                    Some(next) => {
                        let updated = db.set_project_members(id, &next)?;
                        Ok((Some(project), updated))
                    }
                    None => Ok((None, project)),
                }
            })
            .await?;

        if let Some(before) = before {
            info!(workspace_id, project_id = id, user = %user_id, ?kind, "Project members changed");
            self.publish(
                workspace_id,
                BoardEvent::ProjectUpdated(ItemUpdate::new(before.status, after.clone())),
            )
            .await;
        }
        Ok(after)
    }

    /// Set or clear the project lead.
    pub async fn set_project_lead(
        &self,
        caller: &Caller,
        workspace_id: i64,
        id: i64,
        lead: Option<UserId>,
    ) -> GatewayResult<Project> {
        let patch = ProjectPatch {
            lead: Some(lead),
            ..Default::default()
        };
        self.update_project(caller, workspace_id, id, patch).await
    }

    pub async fn commit_project_order(
        &self,
        caller: &Caller,
        workspace_id: i64,
        board: Board<Project>,
    ) -> GatewayResult<Board<Project>> {
        self.commit_order(caller, workspace_id, board).await
    }

    // ── Shared issue/project paths ────────────────────────────────────

    async fn delete_item<T: Guarded>(&self, caller: &Caller, workspace_id: i64, id: i64) -> GatewayResult<()> {
        let c = caller.clone();
        let status = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let item: T = load_item(db, workspace_id, id)?;
                ensure(T::can_delete(&c, &item), &c, "delete")?;
                db.delete_item(T::KIND, id)?;
                Ok(item.status())
            })
            .await?;
        info!(workspace_id, item_id = id, kind = %T::KIND, "Board item deleted");
        self.publish(workspace_id, T::into_event(ItemEvent::Deleted(Removal { id, status })))
            .await;
        Ok(())
    }

    /// Persist a whole submitted board.
    ///
    /// Every item at list index `i` of bucket `s` ends with `(order = i,
    /// status = s)`. Items already in place are skipped without a permission
    /// check. On success the board is re-read from the store and published
    /// as one `*-dragged-and-dropped` event.
    async fn commit_order<T: Guarded>(
        &self,
        caller: &Caller,
        workspace_id: i64,
        board: Board<T>,
    ) -> GatewayResult<Board<T>> {
        let duplicates = board.duplicate_ids();
        if !duplicates.is_empty() {
            return Err(BoardError::Validation(format!(
                "board lists items more than once: {:?}",
                duplicates
            )));
        }
        let c = caller.clone();
        self.db
            .call(move |db| load_member_workspace(db, &c, workspace_id))
            .await?;

        let placements = board.placements();
        let applied = match self.commit_mode {
            CommitMode::BestEffort => {
                self.commit_best_effort::<T>(caller, workspace_id, placements)
                    .await?
            }
            CommitMode::Atomic => {
                self.commit_atomic::<T>(caller, workspace_id, placements)
                    .await?
            }
        };

        let settled = self
            .db
            .call(move |db| -> GatewayResult<_> {
                Ok(Board::<T>::from_items(T::load_all(db, workspace_id)?))
            })
            .await?;
        info!(
            workspace_id,
            kind = %T::KIND,
            applied,
            mode = %self.commit_mode,
            "Board order committed"
        );
        self.publish(
            workspace_id,
            T::into_event(ItemEvent::DraggedAndDropped(settled.clone())),
        )
        .await;
        Ok(settled)
    }

    /// One store call per item. The first failure is returned as-is and
    /// writes already applied stay in place.
    async fn commit_best_effort<T: Guarded>(
        &self,
        caller: &Caller,
        workspace_id: i64,
        placements: Vec<(i64, T::Status, i32)>,
    ) -> GatewayResult<usize> {
        let mut applied = 0;
        for (id, status, order) in placements {
            let c = caller.clone();
            let result = self
                .db
                .call(move |db| -> GatewayResult<bool> {
                    let item: T = load_item(db, workspace_id, id)?;
                    if item.status() == status && item.order() == order {
                        return Ok(false);
                    }
                    ensure(T::can_edit(&c, &item), &c, "reorder")?;
                    db.set_placement(T::KIND, id, status.name(), order)?;
                    Ok(true)
                })
                .await;
            match result {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        workspace_id,
                        item_id = id,
                        applied,
                        "Bulk order commit stopped part-way: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(applied)
    }

    /// Load and authorize every changed item, then write them in one
    /// transaction. Any failure writes nothing.
    async fn commit_atomic<T: Guarded>(
        &self,
        caller: &Caller,
        workspace_id: i64,
        placements: Vec<(i64, T::Status, i32)>,
    ) -> GatewayResult<usize> {
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<usize> {
                let mut writes = Vec::new();
                for (id, status, order) in placements {
                    let item: T = load_item(db, workspace_id, id)?;
                    if item.status() == status && item.order() == order {
                        continue;
                    }
                    ensure(T::can_edit(&c, &item), &c, "reorder")?;
                    writes.push((id, status.name().to_string(), order));
                }
                db.apply_placements(T::KIND, &writes)?;
                Ok(writes.len())
            })
            .await
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub async fn add_comment(&self, caller: &Caller, issue_id: i64, value: &str) -> GatewayResult<Comment> {
        let value = validate_text(value, "comment")?;
        let c = caller.clone();
        let comment = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let issue = db
                    .get_issue(issue_id)?
                    .ok_or(BoardError::IssueNotFound { id: issue_id })?;
                load_member_workspace(db, &c, issue.workspace_id)?;
                Ok(db.create_comment(issue_id, &c.user_id, &value)?)
            })
            .await?;
        info!(issue_id, comment_id = comment.id, "Comment added");
        Ok(comment)
    }

    /// Comments of an issue, newest first.
    pub async fn list_comments(&self, caller: &Caller, issue_id: i64) -> GatewayResult<Vec<Comment>> {
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let issue = db
                    .get_issue(issue_id)?
                    .ok_or(BoardError::IssueNotFound { id: issue_id })?;
                load_member_workspace(db, &c, issue.workspace_id)?;
                Ok(db.list_comments(issue_id)?)
            })
            .await
    }

    pub async fn update_comment(
        &self,
        caller: &Caller,
        issue_id: i64,
        comment_id: i64,
        value: &str,
    ) -> GatewayResult<Comment> {
        let value = validate_text(value, "comment")?;
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let comment = load_comment(db, issue_id, comment_id)?;
                ensure(c.can_edit_comment(&comment), &c, "update comment")?;
                Ok(db.update_comment(comment_id, &value)?)
            })
            .await
    }

    pub async fn delete_comment(&self, caller: &Caller, issue_id: i64, comment_id: i64) -> GatewayResult<()> {
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let comment = load_comment(db, issue_id, comment_id)?;
                ensure(c.can_edit_comment(&comment), &c, "delete comment")?;
                db.delete_comment(comment_id)?;
                Ok(())
            })
            .await
    }

    // ── Milestones ────────────────────────────────────────────────────

    pub async fn create_milestone(
        &self,
        caller: &Caller,
        project_id: i64,
        name: &str,
        description: &str,
    ) -> GatewayResult<Milestone> {
        let name = validate_text(name, "milestone name")?;
        let description = description.to_string();
        let c = caller.clone();
        let milestone = self
            .db
            .call(move |db| -> GatewayResult<_> {
                let project = db
                    .get_project(project_id)?
                    .ok_or(BoardError::ProjectNotFound { id: project_id })?;
                load_member_workspace(db, &c, project.workspace_id)?;
                Ok(db.create_milestone(project_id, &c.user_id, &name, &description)?)
            })
            .await?;
        info!(project_id, milestone_id = milestone.id, "Milestone created");
        Ok(milestone)
    }

    /// Milestones of a project, oldest first.
    pub async fn list_milestones(&self, caller: &Caller, project_id: i64) -> GatewayResult<Vec<Milestone>> {
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let project = db
                    .get_project(project_id)?
                    .ok_or(BoardError::ProjectNotFound { id: project_id })?;
                load_member_workspace(db, &c, project.workspace_id)?;
                Ok(db.list_milestones(project_id)?)
            })
            .await
    }

    pub async fn update_milestone(
        &self,
        caller: &Caller,
        id: i64,
        name: Option<String>,
        description: Option<String>,
    ) -> GatewayResult<Milestone> {
        if let Some(name) = &name {
            validate_text(name, "milestone name")?;
        }
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let milestone = db
                    .get_milestone(id)?
                    .ok_or(BoardError::MilestoneNotFound { id })?;
                ensure(c.can_edit_milestone(&milestone), &c, "update milestone")?;
                Ok(db.update_milestone(id, name.as_deref().map(str::trim), description.as_deref())?)
            })
            .await
    }

    pub async fn delete_milestone(&self, caller: &Caller, id: i64) -> GatewayResult<()> {
        let c = caller.clone();
        self.db
            .call(move |db| -> GatewayResult<_> {
                let milestone = db
                    .get_milestone(id)?
                    .ok_or(BoardError::MilestoneNotFound { id })?;
                ensure(c.can_edit_milestone(&milestone), &c, "delete milestone")?;
                db.delete_milestone(id)?;
                Ok(())
            })
            .await
    }

    // ── Assistant ─────────────────────────────────────────────────────

    /// Answer a free-text question with the workspace's issues and projects
    /// as context.
    pub async fn ask_assistant(&self, caller: &Caller, workspace_id: i64, prompt: &str) -> GatewayResult<String> {
        let prompt = validate_text(prompt, "prompt")?;
        let generator = self
            .assistant
            .clone()
            .ok_or_else(|| BoardError::Validation("assistant is not configured".to_string()))?;
        let c = caller.clone();
        let (issues, projects) = self
            .db
            .call(move |db| -> GatewayResult<_> {
                load_member_workspace(db, &c, workspace_id)?;
                Ok((db.list_issues(workspace_id)?, db.list_projects(workspace_id)?))
            })
            .await?;
        let full_prompt = assistant::build_prompt(&issues, &projects, &prompt);
        debug!(workspace_id, issues = issues.len(), projects = projects.len(), "Querying assistant");
        generator
            .generate(assistant::SYSTEM_PROMPT, &full_prompt)
            .await
            .map_err(|e| BoardError::Assistant(e.to_string()))
    }
}

// ── Store-side helpers (run inside `DbHandle::call`) ──────────────────

fn ensure(allowed: bool, caller: &Caller, action: &str) -> GatewayResult<()> {
    if allowed {
        Ok(())
    } else {
        warn!(user = %caller.user_id, action, "Permission denied");
        Err(BoardError::PermissionDenied)
    }
}

fn load_workspace(db: &BoardDb, id: i64) -> GatewayResult<Workspace> {
    db.get_workspace(id)?
        .ok_or(BoardError::WorkspaceNotFound { id })
}

fn load_member_workspace(db: &BoardDb, caller: &Caller, id: i64) -> GatewayResult<Workspace> {
    let workspace = load_workspace(db, id)?;
    ensure(caller.is_member_of(&workspace), caller, "access workspace")?;
    Ok(workspace)
}

/// An issue or project by id, scoped to its workspace.
fn load_item<T: Guarded>(db: &BoardDb, workspace_id: i64, id: i64) -> GatewayResult<T> {
    T::load(db, id)?
        .filter(|item| item.workspace_id() == workspace_id)
        .ok_or_else(|| T::not_found(id))
}

fn load_comment(db: &BoardDb, issue_id: i64, id: i64) -> GatewayResult<Comment> {
    db.get_comment(id)?
        .filter(|c| c.issue_id == issue_id)
        .ok_or(BoardError::CommentNotFound { id })
}

fn require_member(workspace: &Workspace, user_id: &str) -> GatewayResult<()> {
    if workspace.is_member(user_id) {
        Ok(())
    } else {
        Err(BoardError::Validation(format!(
            "{} is not a member of this workspace",
            user_id
        )))
    }
}

/// The new list after applying `kind`, or `None` when nothing changes.
fn toggle(list: &[UserId], user_id: &str, kind: AssignType) -> Option<Vec<UserId>> {
    let present = list.iter().any(|u| u == user_id);
    match (kind, present) {
        (AssignType::Assign, false) => {
            let mut next = list.to_vec();
            next.push(user_id.to_string());
            Some(next)
        }
        (AssignType::Remove, true) => Some(list.iter().filter(|u| *u != user_id).cloned().collect()),
        _ => None,
    }
}

// ── Input validation ──────────────────────────────────────────────────

fn validate_text(value: &str, field: &str) -> GatewayResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn validate_name(value: &str, field: &str) -> GatewayResult<String> {
    let trimmed = value.trim();
    if trimmed.chars().count() < MIN_NAME_LEN {
        return Err(BoardError::Validation(format!(
            "{} must be at least {} characters",
            field, MIN_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_order(order: Option<i32>) -> GatewayResult<()> {
    match order {
        Some(o) if o < 0 => Err(BoardError::Validation(
            "order must not be negative".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_dates(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> GatewayResult<()> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(BoardError::Validation(
            "end date must not be before start date".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::events::{EventStream, MemoryEventBus};
    use crate::board::models::fixtures::ids;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    struct Harness {
        gw: Gateway,
        ws: Workspace,
        alice: Caller,
        bob: Caller,
        events: EventStream,
    }

    async fn harness(mode: CommitMode) -> Harness {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let bus = Arc::new(MemoryEventBus::new());
        let gw = Gateway::new(db, bus.clone()).with_commit_mode(mode);
        let alice = Caller::new("alice");
        let bob = Caller::new("bob");
        let ws = gw.create_workspace(&alice, "Acme board").await.unwrap();
        gw.join_workspace(&bob, &ws.invite_code).await.unwrap();
        let events = bus.subscribe(ws.id).await.unwrap();
        Harness {
            gw,
            ws,
            alice,
            bob,
            events,
        }
    }

    async fn next_event(events: &mut EventStream) -> BoardEvent {
        tokio::time::timeout(Duration::from_millis(100), events.next())
            .await
            .expect("timeout")
            .expect("stream ended")
    }

    async fn assert_quiet(events: &mut EventStream) {
        let result = tokio::time::timeout(Duration::from_millis(30), events.next()).await;
        assert!(result.is_err(), "Unexpected event: {:?}", result);
    }

    fn new_issue(title: &str, status: IssueStatus) -> CreateIssue {
        CreateIssue {
            title: title.to_string(),
            content: "details".to_string(),
            status,
            label: None,
            project_id: None,
        }
    }

    fn new_project(title: &str, status: ProjectStatus) -> CreateProject {
        CreateProject {
            title: title.to_string(),
            summary: "Quarterly goal".to_string(),
            content: String::new(),
            status,
            label: None,
            start_date: None,
            end_date: None,
        }
    }

    #[tokio::test]
    async fn test_creation_appends_in_order_and_publishes() {
        let mut h = harness(CommitMode::BestEffort).await;
        let mut orders = Vec::new();
        for title in ["one", "two", "three"] {
            let issue = h
                .gw
                .create_issue(&h.alice, h.ws.id, new_issue(title, IssueStatus::Backlog))
                .await
                .unwrap();
            orders.push(issue.order);
            match next_event(&mut h.events).await {
                BoardEvent::IssueCreated(created) => assert_eq!(created, issue),
                other => panic!("Unexpected event {:?}", other),
            }
        }
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_create_requires_membership_and_title() {
        let mut h = harness(CommitMode::BestEffort).await;
        let err = h
            .gw
            .create_issue(&Caller::new("eve"), h.ws.id, new_issue("x", IssueStatus::Todo))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let err = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("   ", IssueStatus::Todo))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        let err = h
            .gw
            .create_issue(&h.alice, 999, new_issue("x", IssueStatus::Todo))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::WorkspaceNotFound { id: 999 }));
        assert_quiet(&mut h.events).await;
    }

    #[tokio::test]
    async fn test_update_by_stranger_is_denied_and_unchanged() {
        let mut h = harness(CommitMode::BestEffort).await;
        let issue = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("Mine", IssueStatus::Todo))
            .await
            .unwrap();
        next_event(&mut h.events).await;

        let patch = IssuePatch {
            title: Some("Hijacked".to_string()),
            ..Default::default()
        };
        let err = h
            .gw
            .update_issue(&h.bob, h.ws.id, issue.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));
        assert_eq!(err.to_string(), crate::errors::PERMISSION_DENIED_MESSAGE);

        let detail = h.gw.get_issue(&h.alice, h.ws.id, issue.id).await.unwrap();
        assert_eq!(detail.issue, issue);
        assert_quiet(&mut h.events).await;
    }

    #[tokio::test]
    async fn test_assignee_may_update() {
        let mut h = harness(CommitMode::BestEffort).await;
        let issue = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("Shared", IssueStatus::Todo))
            .await
            .unwrap();
        h.gw.assign_issue(&h.alice, h.ws.id, issue.id, "bob", AssignType::Assign)
            .await
            .unwrap();
        let patch = IssuePatch {
            content: Some("bob was here".to_string()),
            ..Default::default()
        };
        let updated = h
            .gw
            .update_issue(&h.bob, h.ws.id, issue.id, patch)
            .await
            .unwrap();
        assert_eq!(updated.content, "bob was here");

        next_event(&mut h.events).await; // created
        next_event(&mut h.events).await; // assigned
        match next_event(&mut h.events).await {
            BoardEvent::IssueUpdated(u) => {
                assert!(!u.status_changed);
                assert_eq!(u.updated.content, "bob was here");
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_issue_from_other_workspace_is_not_found() {
        let h = harness(CommitMode::BestEffort).await;
        let other = h.gw.create_workspace(&h.alice, "Other space").await.unwrap();
        let issue = h
            .gw
            .create_issue(&h.alice, other.id, new_issue("Elsewhere", IssueStatus::Todo))
            .await
            .unwrap();
        let err = h
            .gw
            .delete_issue(&h.alice, h.ws.id, issue.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::IssueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_status_change_publishes_move() {
        let mut h = harness(CommitMode::BestEffort).await;
        let a = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::Todo))
            .await
            .unwrap();
        let b = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("B", IssueStatus::Todo))
            .await
            .unwrap();
        next_event(&mut h.events).await;
        next_event(&mut h.events).await;

        let patch = IssuePatch {
            status: Some(IssueStatus::Done),
            ..Default::default()
        };
        let moved = h
            .gw
            .update_issue(&h.alice, h.ws.id, a.id, patch)
            .await
            .unwrap();
        assert_eq!((moved.status, moved.order), (IssueStatus::Done, 0));

        match next_event(&mut h.events).await {
            BoardEvent::IssueUpdated(u) => {
                assert!(u.status_changed);
                assert_eq!(u.prev_status, IssueStatus::Todo);
                assert_eq!(u.new_status, IssueStatus::Done);
            }
            other => panic!("Unexpected event {:?}", other),
        }

        let board = h.gw.issue_board(&h.alice, h.ws.id).await.unwrap();
        assert!(board.is_dense());
        assert_eq!(ids(&board, IssueStatus::Todo), vec![b.id]);
    }

    #[tokio::test]
    async fn test_status_change_with_order_keeps_buckets_dense() {
        let mut h = harness(CommitMode::BestEffort).await;
        let a = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::Todo))
            .await
            .unwrap();
        let b = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("B", IssueStatus::Todo))
            .await
            .unwrap();
        let c = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("C", IssueStatus::Done))
            .await
            .unwrap();
        for _ in 0..3 {
            next_event(&mut h.events).await;
        }

        let patch = IssuePatch {
            status: Some(IssueStatus::Done),
            order: Some(0),
            ..Default::default()
        };
        let moved = h
            .gw
            .update_issue(&h.alice, h.ws.id, a.id, patch)
            .await
            .unwrap();
        assert_eq!((moved.status, moved.order), (IssueStatus::Done, 0));

        let board = h.gw.issue_board(&h.alice, h.ws.id).await.unwrap();
        assert!(board.is_dense());
        assert_eq!(ids(&board, IssueStatus::Done), vec![a.id, c.id]);
        assert_eq!(ids(&board, IssueStatus::Todo), vec![b.id]);

        // An order past the end of the bucket lands last.
        let patch = IssuePatch {
            status: Some(IssueStatus::Todo),
            order: Some(40),
            ..Default::default()
        };
        let back = h
            .gw
            .update_issue(&h.alice, h.ws.id, c.id, patch)
            .await
            .unwrap();
        assert_eq!(back.order, 1);
        let board = h.gw.issue_board(&h.alice, h.ws.id).await.unwrap();
        assert!(board.is_dense());
        assert_eq!(ids(&board, IssueStatus::Todo), vec![b.id, c.id]);
    }

    #[tokio::test]
    async fn test_negative_order_is_rejected() {
        let mut h = harness(CommitMode::BestEffort).await;
        let a = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::Todo))
            .await
            .unwrap();
        let project = h
            .gw
            .create_project(&h.alice, h.ws.id, new_project("Roadmap", ProjectStatus::Backlog))
            .await
            .unwrap();
        next_event(&mut h.events).await;
        next_event(&mut h.events).await;

        let patch = IssuePatch {
            order: Some(-7),
            ..Default::default()
        };
        let err = h
            .gw
            .update_issue(&h.alice, h.ws.id, a.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        let patch = ProjectPatch {
            order: Some(-1),
            ..Default::default()
        };
        let err = h
            .gw
            .update_project(&h.alice, h.ws.id, project.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        let stored = h.gw.get_issue(&h.alice, h.ws.id, a.id).await.unwrap();
        assert_eq!(stored.issue.order, 0);
        assert_quiet(&mut h.events).await;
    }

    #[tokio::test]
    async fn test_order_only_update_is_silent() {
        let mut h = harness(CommitMode::BestEffort).await;
        let a = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::Todo))
            .await
            .unwrap();
        next_event(&mut h.events).await;

        let patch = IssuePatch {
            order: Some(0),
            ..Default::default()
        };
        h.gw.update_issue(&h.alice, h.ws.id, a.id, patch)
            .await
            .unwrap();
        assert_quiet(&mut h.events).await;
    }

    #[tokio::test]
    async fn test_delete_publishes_id_and_status() {
        let mut h = harness(CommitMode::BestEffort).await;
        let a = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::InProgress))
            .await
            .unwrap();
        next_event(&mut h.events).await;

        let err = h.gw.delete_issue(&h.bob, h.ws.id, a.id).await.unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        h.gw.delete_issue(&h.alice, h.ws.id, a.id).await.unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            BoardEvent::IssueDeleted(Removal {
                id: a.id,
                status: IssueStatus::InProgress
            })
        );
    }

    #[tokio::test]
    async fn test_assign_is_idempotent_and_owner_only() {
        let mut h = harness(CommitMode::BestEffort).await;
        let issue = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::Todo))
            .await
            .unwrap();
        next_event(&mut h.events).await;

        // Removing an absent assignee succeeds and changes nothing.
        let same = h
            .gw
            .assign_issue(&h.alice, h.ws.id, issue.id, "bob", AssignType::Remove)
            .await
            .unwrap();
        assert!(same.assigned_to.is_empty());
        assert_quiet(&mut h.events).await;

        let assigned = h
            .gw
            .assign_issue(&h.alice, h.ws.id, issue.id, "bob", AssignType::Assign)
            .await
            .unwrap();
        assert_eq!(assigned.assigned_to, vec!["bob".to_string()]);
        next_event(&mut h.events).await;

        let again = h
            .gw
            .assign_issue(&h.alice, h.ws.id, issue.id, "bob", AssignType::Assign)
            .await
            .unwrap();
        assert_eq!(again.assigned_to, vec!["bob".to_string()]);
        assert_quiet(&mut h.events).await;

        // Assignees may edit but not reassign.
        let err = h
            .gw
            .assign_issue(&h.bob, h.ws.id, issue.id, "bob", AssignType::Remove)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let err = h
            .gw
            .assign_issue(&h.alice, h.ws.id, issue.id, "stranger", AssignType::Assign)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
    }

    async fn seed_todo(h: &Harness, owners: &[&Caller]) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (i, owner) in owners.iter().enumerate() {
            issues.push(
                h.gw.create_issue(owner, h.ws.id, new_issue(&format!("T{}", i), IssueStatus::Todo))
                    .await
                    .unwrap(),
            );
        }
        issues
    }

    fn reordered(issues: &[Issue], order: &[usize]) -> Board<Issue> {
        let mut board = Board::empty();
        for idx in order {
            board.bucket_mut(IssueStatus::Todo).push(issues[*idx].clone());
        }
        board
    }

    #[tokio::test]
    async fn test_bulk_commit_publishes_settled_board() {
        let mut h = harness(CommitMode::BestEffort).await;
        let issues = seed_todo(&h, &[&h.alice, &h.alice, &h.alice]).await;
        for _ in 0..3 {
            next_event(&mut h.events).await;
        }

        let board = reordered(&issues, &[1, 2, 0]);
        let settled = h
            .gw
            .commit_issue_order(&h.alice, h.ws.id, board)
            .await
            .unwrap();
        assert_eq!(
            ids(&settled, IssueStatus::Todo),
            vec![issues[1].id, issues[2].id, issues[0].id]
        );
        assert!(settled.is_dense());
        assert_eq!(
            next_event(&mut h.events).await,
            BoardEvent::IssueDraggedAndDropped(settled)
        );
    }

    #[tokio::test]
    async fn test_bulk_commit_best_effort_keeps_partial_writes() {
        let mut h = harness(CommitMode::BestEffort).await;
        let issues = seed_todo(&h, &[&h.bob, &h.bob, &h.alice]).await;
        for _ in 0..3 {
            next_event(&mut h.events).await;
        }

        // bob moves his second issue to the top; alice's issue is in the way.
        let board = reordered(&issues, &[1, 2, 0]);
        let err = h
            .gw
            .commit_issue_order(&h.bob, h.ws.id, board)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));
        assert_quiet(&mut h.events).await;

        let stored = h.gw.issue_board(&h.alice, h.ws.id).await.unwrap();
        let orders: Vec<(i64, i32)> = stored
            .bucket(IssueStatus::Todo)
            .iter()
            .map(|i| (i.id, i.order))
            .collect();
        // The first write landed and was not rolled back.
        assert!(orders.contains(&(issues[1].id, 0)));
        assert!(orders.contains(&(issues[0].id, 0)));
    }

    #[tokio::test]
    async fn test_bulk_commit_atomic_writes_nothing_on_failure() {
        let mut h = harness(CommitMode::Atomic).await;
        let issues = seed_todo(&h, &[&h.bob, &h.bob, &h.alice]).await;
        for _ in 0..3 {
            next_event(&mut h.events).await;
        }

        let board = reordered(&issues, &[1, 2, 0]);
        let err = h
            .gw
            .commit_issue_order(&h.bob, h.ws.id, board)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let stored = h.gw.issue_board(&h.alice, h.ws.id).await.unwrap();
        assert!(stored.is_dense());
        assert_eq!(
            ids(&stored, IssueStatus::Todo),
            issues.iter().map(|i| i.id).collect::<Vec<_>>()
        );
        assert_quiet(&mut h.events).await;
    }

    #[tokio::test]
    async fn test_bulk_commit_skips_unchanged_items() {
        let h = harness(CommitMode::BestEffort).await;
        // alice's issue stays put, so bob needs no rights over it.
        let issues = seed_todo(&h, &[&h.alice, &h.bob, &h.bob]).await;
        let board = reordered(&issues, &[0, 2, 1]);
        let settled = h
            .gw
            .commit_issue_order(&h.bob, h.ws.id, board)
            .await
            .unwrap();
        assert_eq!(
            ids(&settled, IssueStatus::Todo),
            vec![issues[0].id, issues[2].id, issues[1].id]
        );
    }

    #[tokio::test]
    async fn test_bulk_commit_rejects_duplicates() {
        let h = harness(CommitMode::BestEffort).await;
        let issues = seed_todo(&h, &[&h.alice]).await;
        let mut board = reordered(&issues, &[0]);
        let mut copy = issues[0].clone();
        copy.status = IssueStatus::Done;
        board.bucket_mut(IssueStatus::Done).push(copy);
        let err = h
            .gw
            .commit_issue_order(&h.alice, h.ws.id, board)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
    }

    #[tokio::test]
    async fn test_project_roles_through_gateway() {
        let mut h = harness(CommitMode::BestEffort).await;
        let project = h
            .gw
            .create_project(&h.alice, h.ws.id, new_project("Launch", ProjectStatus::Planned))
            .await
            .unwrap();
        next_event(&mut h.events).await;

        let err = h
            .gw
            .update_project(
                &h.bob,
                h.ws.id,
                project.id,
                ProjectPatch {
                    title: Some("Mine now".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        h.gw.assign_project_member(&h.alice, h.ws.id, project.id, "bob", AssignType::Assign)
            .await
            .unwrap();
        next_event(&mut h.events).await;

        // Members edit, but neither delete nor change the lead.
        h.gw.update_project(
            &h.bob,
            h.ws.id,
            project.id,
            ProjectPatch {
                content: Some("notes".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = h
            .gw
            .set_project_lead(&h.bob, h.ws.id, project.id, Some("bob".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));
        let err = h
            .gw
            .delete_project(&h.bob, h.ws.id, project.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        // Once lead, bob may delete.
        h.gw.set_project_lead(&h.alice, h.ws.id, project.id, Some("bob".to_string()))
            .await
            .unwrap();
        h.gw.delete_project(&h.bob, h.ws.id, project.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_project_summary_and_dates_validated() {
        let h = harness(CommitMode::BestEffort).await;
        let mut req = new_project("Launch", ProjectStatus::Backlog);
        req.summary = "tiny".to_string();
        let err = h.gw.create_project(&h.alice, h.ws.id, req).await.unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        let mut req = new_project("Launch", ProjectStatus::Backlog);
        req.start_date = Some("2024-05-01T00:00:00Z".parse().unwrap());
        req.end_date = Some("2024-04-01T00:00:00Z".parse().unwrap());
        let err = h.gw.create_project(&h.alice, h.ws.id, req).await.unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
    }

    #[tokio::test]
    async fn test_workspace_lifecycle() {
        let h = harness(CommitMode::BestEffort).await;
        assert_eq!(h.ws.members, vec!["alice".to_string()]);

        let joined = h.gw.join_workspace(&h.bob, &h.ws.invite_code).await.unwrap();
        assert_eq!(joined.members, vec!["alice".to_string(), "bob".to_string()]);

        let err = h.gw.join_workspace(&h.bob, "bogus").await.unwrap_err();
        assert!(matches!(err, BoardError::InviteNotFound));

        let err = h.gw.create_workspace(&h.alice, "abc").await.unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        let err = h.gw.update_workspace(&h.bob, h.ws.id, "Bob's board").await.unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let err = h.gw.remove_member(&h.alice, h.ws.id, "alice").await.unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        let ws = h.gw.remove_member(&h.alice, h.ws.id, "bob").await.unwrap();
        assert_eq!(ws.members, vec!["alice".to_string()]);
        let err = h.gw.issue_board(&h.bob, h.ws.id).await.unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let err = h.gw.delete_workspace(&h.bob, h.ws.id).await.unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));
        h.gw.delete_workspace(&h.alice, h.ws.id).await.unwrap();
        let err = h.gw.get_workspace(&h.alice, h.ws.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_comments_are_owner_edited() {
        let h = harness(CommitMode::BestEffort).await;
        let issue = h
            .gw
            .create_issue(&h.alice, h.ws.id, new_issue("A", IssueStatus::Todo))
            .await
            .unwrap();
        let comment = h.gw.add_comment(&h.bob, issue.id, "looks good").await.unwrap();

        let err = h
            .gw
            .update_comment(&h.alice, issue.id, comment.id, "rewritten")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let edited = h
            .gw
            .update_comment(&h.bob, issue.id, comment.id, "looks great")
            .await
            .unwrap();
        assert_eq!(edited.value, "looks great");

        let err = h
            .gw
            .delete_comment(&h.bob, issue.id + 1, comment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::CommentNotFound { .. }));

        h.gw.delete_comment(&h.bob, issue.id, comment.id).await.unwrap();
        assert!(h.gw.list_comments(&h.alice, issue.id).await.unwrap().is_empty());

        let err = h.gw.add_comment(&h.bob, 4242, "hello").await.unwrap_err();
        assert!(matches!(err, BoardError::IssueNotFound { id: 4242 }));
    }

    #[tokio::test]
    async fn test_milestones_are_owner_edited() {
        let h = harness(CommitMode::BestEffort).await;
        let project = h
            .gw
            .create_project(&h.alice, h.ws.id, new_project("Launch", ProjectStatus::Planned))
            .await
            .unwrap();
        let milestone = h
            .gw
            .create_milestone(&h.alice, project.id, "Beta", "first users")
            .await
            .unwrap();

        let err = h
            .gw
            .update_milestone(&h.bob, milestone.id, Some("GA".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let updated = h
            .gw
            .update_milestone(&h.alice, milestone.id, Some("GA".to_string()), None)
            .await
            .unwrap();
        assert_eq!(updated.name, "GA");
        assert_eq!(updated.description, "first users");

        let detail = h.gw.get_project(&h.alice, h.ws.id, project.id).await.unwrap();
        assert_eq!(detail.milestones.len(), 1);

        h.gw.delete_milestone(&h.alice, milestone.id).await.unwrap();
        let err = h.gw.delete_milestone(&h.alice, milestone.id).await.unwrap_err();
        assert!(matches!(err, BoardError::MilestoneNotFound { .. }));
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
            assert_eq!(system, assistant::SYSTEM_PROMPT);
            Ok(prompt.to_string())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[tokio::test]
    async fn test_assistant_unconfigured() {
        let h = harness(CommitMode::BestEffort).await;
        let err = h
            .gw
            .ask_assistant(&h.alice, h.ws.id, "status?")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: assistant is not configured");
    }

    #[tokio::test]
    async fn test_assistant_receives_workspace_context() {
        let h = harness(CommitMode::BestEffort).await;
        h.gw.create_issue(&h.alice, h.ws.id, new_issue("Fix login", IssueStatus::Todo))
            .await
            .unwrap();
        let gw = h.gw.with_assistant(Arc::new(EchoGenerator));
        let answer = gw.ask_assistant(&h.alice, h.ws.id, "What next?").await.unwrap();
        assert!(answer.contains("Fix login with status TODO"));
        assert!(answer.ends_with("Prompt: What next?"));

        let err = gw
            .ask_assistant(&Caller::new("eve"), h.ws.id, "leak?")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied));

        let gw = gw.with_assistant(Arc::new(FailingGenerator));
        let err = gw.ask_assistant(&h.alice, h.ws.id, "What next?").await.unwrap_err();
        assert!(matches!(err, BoardError::Assistant(msg) if msg.contains("quota")));
    }
}
