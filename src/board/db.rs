use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    ///
    /// The closure may return any error type that absorbs `anyhow::Error`, so
    /// gateway code can mix store calls with its own typed errors.
    pub async fn call<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&BoardDb) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<anyhow::Error> + Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .map_err(|e| E::from(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

pub struct BoardDb {
    conn: Connection,
}

/// Fields of an issue supplied at creation time.
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub workspace_id: i64,
    pub owner_id: UserId,
    pub title: String,
    pub content: String,
    pub status: IssueStatus,
    pub label: Option<Label>,
    pub project_id: Option<i64>,
}

/// Fields of a project supplied at creation time.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub workspace_id: i64,
    pub owner_id: UserId,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub status: ProjectStatus,
    pub label: Option<Label>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workspaces (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    owner_id TEXT NOT NULL,
                    invite_code TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workspace_members (
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL,
                    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (workspace_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    owner_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    summary TEXT NOT NULL DEFAULT '',
                    content TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'BACKLOG',
                    label TEXT,
                    order_index INTEGER NOT NULL DEFAULT 0,
                    lead TEXT,
                    members TEXT NOT NULL DEFAULT '[]',
                    start_date TEXT,
                    end_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    owner_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'BACKLOG',
                    label TEXT,
                    order_index INTEGER NOT NULL DEFAULT 0,
                    assigned_to TEXT NOT NULL DEFAULT '[]',
                    project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS milestones (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    owner_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                    owner_id TEXT NOT NULL,
                    value TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_members_user ON workspace_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_issues_bucket ON issues(workspace_id, status, order_index);
                CREATE INDEX IF NOT EXISTS idx_projects_bucket ON projects(workspace_id, status, order_index);
                CREATE INDEX IF NOT EXISTS idx_milestones_project ON milestones(project_id);
                CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Workspace CRUD ────────────────────────────────────────────────

    /// Insert a workspace and record its owner as the first member.
    pub fn create_workspace(&self, name: &str, owner_id: &str, invite_code: &str) -> Result<Workspace> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO workspaces (name, owner_id, invite_code) VALUES (?1, ?2, ?3)",
            params![name, owner_id, invite_code],
        )
        .context("Failed to insert workspace")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO workspace_members (workspace_id, user_id) VALUES (?1, ?2)",
            params![id, owner_id],
        )
        .context("Failed to insert workspace owner membership")?;
        tx.commit().context("Failed to commit workspace insert")?;
        self.get_workspace(id)?
            .context("Workspace not found after insert")
    }

    pub fn get_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, owner_id, invite_code, created_at FROM workspaces WHERE id = ?1",
                params![id],
                workspace_row,
            )
            .optional()
            .context("Failed to query workspace")?;
        row.map(|w| self.with_members(w)).transpose()
    }

    pub fn get_workspace_by_invite(&self, invite_code: &str) -> Result<Option<Workspace>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, owner_id, invite_code, created_at FROM workspaces WHERE invite_code = ?1",
                params![invite_code],
                workspace_row,
            )
            .optional()
            .context("Failed to query workspace by invite code")?;
        row.map(|w| self.with_members(w)).transpose()
    }

    /// Workspaces `user_id` belongs to, oldest first.
    pub fn list_workspaces_for(&self, user_id: &str) -> Result<Vec<Workspace>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT w.id, w.name, w.owner_id, w.invite_code, w.created_at
                 FROM workspaces w JOIN workspace_members m ON m.workspace_id = w.id
                 WHERE m.user_id = ?1 ORDER BY w.id",
            )
            .context("Failed to prepare list_workspaces_for")?;
        let rows = stmt
            .query_map(params![user_id], workspace_row)
            .context("Failed to query workspaces")?;
        let mut workspaces = Vec::new();
        for row in rows {
            let w = row.context("Failed to read workspace row")?;
            workspaces.push(self.with_members(w)?);
        }
        Ok(workspaces)
    }

    pub fn rename_workspace(&self, id: i64, name: &str) -> Result<Workspace> {
        self.conn
            .execute(
                "UPDATE workspaces SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to rename workspace")?;
        self.get_workspace(id)?
            .context("Workspace not found after rename")
    }

    /// Delete a workspace; issues, projects, milestones and comments cascade.
    pub fn delete_workspace(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM workspaces WHERE id = ?1", params![id])
            .context("Failed to delete workspace")?;
        Ok(count > 0)
    }

    /// Returns false when the user was already a member.
    pub fn add_member(&self, workspace_id: i64, user_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id) VALUES (?1, ?2)",
                params![workspace_id, user_id],
            )
            .context("Failed to add workspace member")?;
        Ok(count > 0)
    }

    pub fn remove_member(&self, workspace_id: i64, user_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
            )
            .context("Failed to remove workspace member")?;
        Ok(count > 0)
    }

    fn with_members(&self, mut workspace: Workspace) -> Result<Workspace> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id FROM workspace_members WHERE workspace_id = ?1 ORDER BY joined_at, rowid",
            )
            .context("Failed to prepare member query")?;
        let rows = stmt
            .query_map(params![workspace.id], |row| row.get::<_, String>(0))
            .context("Failed to query workspace members")?;
        for row in rows {
            workspace
                .members
                .push(row.context("Failed to read member row")?);
        }
        Ok(workspace)
    }

    // ── Bucket ordering ───────────────────────────────────────────────

    /// `(max order in bucket) + 1`, or 0 for an empty bucket.
    pub fn next_order(&self, kind: BoardKind, workspace_id: i64, status: &str) -> Result<i32> {
        next_order_in(&self.conn, kind, workspace_id, status)
    }

    /// Stored `(workspace_id, status, order)` of one item.
    pub fn placement(&self, kind: BoardKind, id: i64) -> Result<Option<(i64, String, i32)>> {
        let sql = format!(
            "SELECT workspace_id, status, order_index FROM {} WHERE id = ?1",
            table(kind)
        );
        self.conn
            .query_row(&sql, params![id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()
            .context("Failed to query placement")
    }

    pub fn set_placement(&self, kind: BoardKind, id: i64, status: &str, order: i32) -> Result<()> {
        set_placement_in(&self.conn, kind, id, status, order)
    }

    /// Write every `(id, status, order)` triple in one transaction.
    pub fn apply_placements(&self, kind: BoardKind, placements: &[(i64, String, i32)]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        for (id, status, order) in placements {
            set_placement_in(&tx, kind, *id, status, *order)?;
        }
        tx.commit().context("Failed to commit placements")?;
        Ok(())
    }

    /// Shift every item after `removed_order` in the bucket down by one.
    pub fn close_gap(
        &self,
        kind: BoardKind,
        workspace_id: i64,
        status: &str,
        removed_order: i32,
    ) -> Result<()> {
        close_gap_in(&self.conn, kind, workspace_id, status, removed_order)
    }

    // ── Issue CRUD ────────────────────────────────────────────────────

    pub fn create_issue(&self, new: &NewIssue) -> Result<Issue> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let order = next_order_in(&tx, BoardKind::Issues, new.workspace_id, new.status.as_str())?;
        tx.execute(
            "INSERT INTO issues (workspace_id, owner_id, title, content, status, label, order_index, project_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.workspace_id,
                new.owner_id,
                new.title,
                new.content,
                new.status.as_str(),
                new.label.map(|l| l.as_str()),
                order,
                new.project_id
            ],
        )
        .context("Failed to insert issue")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit issue insert")?;
        self.get_issue(id)?.context("Issue not found after insert")
    }

    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        let sql = format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], issue_row)
            .optional()
            .context("Failed to query issue")?;
        row.map(IssueRow::into_issue).transpose()
    }

    /// All issues of a workspace, ordered by status then order.
    pub fn list_issues(&self, workspace_id: i64) -> Result<Vec<Issue>> {
        let sql = format!(
            "SELECT {} FROM issues WHERE workspace_id = ?1 ORDER BY status, order_index, id",
            ISSUE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_issues")?;
        let rows = stmt
            .query_map(params![workspace_id], issue_row)
            .context("Failed to query issues")?;
        let mut issues = Vec::new();
        for row in rows {
            let r = row.context("Failed to read issue row")?;
            issues.push(r.into_issue()?);
        }
        Ok(issues)
    }

    /// Persist the supplied fields only, in one transaction.
    ///
    /// A status change without an explicit order appends the issue to the
    /// end of its new bucket and closes the gap it left behind.
    pub fn update_issue(&self, id: i64, patch: &IssuePatch) -> Result<Issue> {
        let current = self
            .get_issue(id)?
            .context("Issue not found for update")?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(t) = &patch.title {
            tx.execute("UPDATE issues SET title = ?1 WHERE id = ?2", params![t, id])
                .context("Failed to update issue title")?;
        }
        if let Some(c) = &patch.content {
            tx.execute("UPDATE issues SET content = ?1 WHERE id = ?2", params![c, id])
                .context("Failed to update issue content")?;
        }
        if let Some(label) = &patch.label {
            tx.execute(
                "UPDATE issues SET label = ?1 WHERE id = ?2",
                params![label.map(|l| l.as_str()), id],
            )
            .context("Failed to update issue label")?;
        }
        if let Some(project_id) = &patch.project_id {
            tx.execute(
                "UPDATE issues SET project_id = ?1 WHERE id = ?2",
                params![project_id, id],
            )
            .context("Failed to update issue project")?;
        }
        apply_patch_placement(
            &tx,
            BoardKind::Issues,
            current.workspace_id,
            id,
            (current.status.as_str(), current.order),
            (patch.status.map(|s| s.as_str()), patch.order),
        )?;
        tx.execute(
            "UPDATE issues SET updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )
        .context("Failed to touch issue")?;

        tx.commit().context("Failed to commit issue update")?;
        self.get_issue(id)?.context("Issue not found after update")
    }

    pub fn set_assignees(&self, id: i64, assignees: &[UserId]) -> Result<Issue> {
        let json = serde_json::to_string(assignees).context("Failed to encode assignees")?;
        self.conn
            .execute(
                "UPDATE issues SET assigned_to = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![json, id],
            )
            .context("Failed to update issue assignees")?;
        self.get_issue(id)?
            .context("Issue not found after assignee update")
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    pub fn create_project(&self, new: &NewProject) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let order = next_order_in(&tx, BoardKind::Projects, new.workspace_id, new.status.as_str())?;
        tx.execute(
            "INSERT INTO projects (workspace_id, owner_id, title, summary, content, status, label, order_index, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.workspace_id,
                new.owner_id,
                new.title,
                new.summary,
                new.content,
                new.status.as_str(),
                new.label.map(|l| l.as_str()),
                order,
                new.start_date.map(|d| d.to_rfc3339()),
                new.end_date.map(|d| d.to_rfc3339())
            ],
        )
        .context("Failed to insert project")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit project insert")?;
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], project_row)
            .optional()
            .context("Failed to query project")?;
        row.map(ProjectRow::into_project).transpose()
    }

    pub fn list_projects(&self, workspace_id: i64) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects WHERE workspace_id = ?1 ORDER BY status, order_index, id",
            PROJECT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(params![workspace_id], project_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let r = row.context("Failed to read project row")?;
            projects.push(r.into_project()?);
        }
        Ok(projects)
    }

    /// Same placement rules as [`BoardDb::update_issue`].
    pub fn update_project(&self, id: i64, patch: &ProjectPatch) -> Result<Project> {
        let current = self
            .get_project(id)?
            .context("Project not found for update")?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(t) = &patch.title {
            tx.execute("UPDATE projects SET title = ?1 WHERE id = ?2", params![t, id])
                .context("Failed to update project title")?;
        }
        if let Some(s) = &patch.summary {
            tx.execute("UPDATE projects SET summary = ?1 WHERE id = ?2", params![s, id])
                .context("Failed to update project summary")?;
        }
        if let Some(c) = &patch.content {
            tx.execute("UPDATE projects SET content = ?1 WHERE id = ?2", params![c, id])
                .context("Failed to update project content")?;
        }
        if let Some(label) = &patch.label {
            tx.execute(
                "UPDATE projects SET label = ?1 WHERE id = ?2",
                params![label.map(|l| l.as_str()), id],
            )
            .context("Failed to update project label")?;
        }
        if let Some(lead) = &patch.lead {
            tx.execute("UPDATE projects SET lead = ?1 WHERE id = ?2", params![lead, id])
                .context("Failed to update project lead")?;
        }
        if let Some(start) = &patch.start_date {
            tx.execute(
                "UPDATE projects SET start_date = ?1 WHERE id = ?2",
                params![start.map(|d| d.to_rfc3339()), id],
            )
            .context("Failed to update project start date")?;
        }
        if let Some(end) = &patch.end_date {
            tx.execute(
                "UPDATE projects SET end_date = ?1 WHERE id = ?2",
                params![end.map(|d| d.to_rfc3339()), id],
            )
            .context("Failed to update project end date")?;
        }
        apply_patch_placement(
            &tx,
            BoardKind::Projects,
            current.workspace_id,
            id,
            (current.status.as_str(), current.order),
            (patch.status.map(|s| s.as_str()), patch.order),
        )?;
        tx.execute(
            "UPDATE projects SET updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )
        .context("Failed to touch project")?;

        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)?
            .context("Project not found after update")
    }

    pub fn set_project_members(&self, id: i64, members: &[UserId]) -> Result<Project> {
        let json = serde_json::to_string(members).context("Failed to encode project members")?;
        self.conn
            .execute(
                "UPDATE projects SET members = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![json, id],
            )
            .context("Failed to update project members")?;
        self.get_project(id)?
            .context("Project not found after member update")
    }

    /// Delete an issue or project and close the gap in its bucket. A
    /// project's milestones cascade; issues pointing at it are detached.
    pub fn delete_item(&self, kind: BoardKind, id: i64) -> Result<bool> {
        delete_placed(&self.conn, kind, id)
    }

    // ── Milestones ────────────────────────────────────────────────────

    pub fn create_milestone(
        &self,
        project_id: i64,
        owner_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Milestone> {
        self.conn
            .execute(
                "INSERT INTO milestones (project_id, owner_id, name, description) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, owner_id, name, description],
            )
            .context("Failed to insert milestone")?;
        let id = self.conn.last_insert_rowid();
        self.get_milestone(id)?
            .context("Milestone not found after insert")
    }

    pub fn get_milestone(&self, id: i64) -> Result<Option<Milestone>> {
        self.conn
            .query_row(
                "SELECT id, project_id, owner_id, name, description, created_at FROM milestones WHERE id = ?1",
                params![id],
                milestone_row,
            )
            .optional()
            .context("Failed to query milestone")
    }

    /// Milestones of a project, oldest first.
    pub fn list_milestones(&self, project_id: i64) -> Result<Vec<Milestone>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, owner_id, name, description, created_at
                 FROM milestones WHERE project_id = ?1 ORDER BY created_at, id",
            )
            .context("Failed to prepare list_milestones")?;
        let rows = stmt
            .query_map(params![project_id], milestone_row)
            .context("Failed to query milestones")?;
        let mut milestones = Vec::new();
        for row in rows {
            milestones.push(row.context("Failed to read milestone row")?);
        }
        Ok(milestones)
    }

    pub fn update_milestone(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Milestone> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(n) = name {
            tx.execute("UPDATE milestones SET name = ?1 WHERE id = ?2", params![n, id])
                .context("Failed to update milestone name")?;
        }
        if let Some(d) = description {
            tx.execute(
                "UPDATE milestones SET description = ?1 WHERE id = ?2",
                params![d, id],
            )
            .context("Failed to update milestone description")?;
        }
        tx.commit().context("Failed to commit milestone update")?;
        self.get_milestone(id)?
            .context("Milestone not found after update")
    }

    pub fn delete_milestone(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM milestones WHERE id = ?1", params![id])
            .context("Failed to delete milestone")?;
        Ok(count > 0)
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub fn create_comment(&self, issue_id: i64, owner_id: &str, value: &str) -> Result<Comment> {
        self.conn
            .execute(
                "INSERT INTO comments (issue_id, owner_id, value) VALUES (?1, ?2, ?3)",
                params![issue_id, owner_id, value],
            )
            .context("Failed to insert comment")?;
        let id = self.conn.last_insert_rowid();
        self.get_comment(id)?
            .context("Comment not found after insert")
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        self.conn
            .query_row(
                "SELECT id, issue_id, owner_id, value, created_at, updated_at FROM comments WHERE id = ?1",
                params![id],
                comment_row,
            )
            .optional()
            .context("Failed to query comment")
    }

    /// Comments of an issue, newest first.
    pub fn list_comments(&self, issue_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, issue_id, owner_id, value, created_at, updated_at
                 FROM comments WHERE issue_id = ?1 ORDER BY created_at DESC, id DESC",
            )
            .context("Failed to prepare list_comments")?;
        let rows = stmt
            .query_map(params![issue_id], comment_row)
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row.context("Failed to read comment row")?);
        }
        Ok(comments)
    }

    pub fn update_comment(&self, id: i64, value: &str) -> Result<Comment> {
        self.conn
            .execute(
                "UPDATE comments SET value = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![value, id],
            )
            .context("Failed to update comment")?;
        self.get_comment(id)?
            .context("Comment not found after update")
    }

    pub fn delete_comment(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])
            .context("Failed to delete comment")?;
        Ok(count > 0)
    }
}

/// Board items the store can load generically, so bulk commits work the
/// same for issues and projects.
pub trait StoredItem: BoardItem {
    fn load(db: &BoardDb, id: i64) -> Result<Option<Self>>;
    fn load_all(db: &BoardDb, workspace_id: i64) -> Result<Vec<Self>>;
}

impl StoredItem for Issue {
    fn load(db: &BoardDb, id: i64) -> Result<Option<Self>> {
        db.get_issue(id)
    }
    fn load_all(db: &BoardDb, workspace_id: i64) -> Result<Vec<Self>> {
        db.list_issues(workspace_id)
    }
}

impl StoredItem for Project {
    fn load(db: &BoardDb, id: i64) -> Result<Option<Self>> {
        db.get_project(id)
    }
    fn load_all(db: &BoardDb, workspace_id: i64) -> Result<Vec<Self>> {
        db.list_projects(workspace_id)
    }
}

// ── Shared SQL helpers ────────────────────────────────────────────────

fn table(kind: BoardKind) -> &'static str {
    match kind {
        BoardKind::Issues => "issues",
        BoardKind::Projects => "projects",
    }
}

fn next_order_in(conn: &Connection, kind: BoardKind, workspace_id: i64, status: &str) -> Result<i32> {
    let sql = format!(
        "SELECT COALESCE(MAX(order_index), -1) FROM {} WHERE workspace_id = ?1 AND status = ?2",
        table(kind)
    );
    let max: i32 = conn
        .query_row(&sql, params![workspace_id, status], |row| row.get(0))
        .context("Failed to get max order")?;
    Ok(max + 1)
}

fn set_placement_in(conn: &Connection, kind: BoardKind, id: i64, status: &str, order: i32) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET status = ?1, order_index = ?2, updated_at = datetime('now') WHERE id = ?3",
        table(kind)
    );
    let count = conn
        .execute(&sql, params![status, order, id])
        .context("Failed to set placement")?;
    if count == 0 {
        anyhow::bail!("No {} row with id {}", table(kind), id);
    }
    Ok(())
}

fn close_gap_in(
    conn: &Connection,
    kind: BoardKind,
    workspace_id: i64,
    status: &str,
    removed_order: i32,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET order_index = order_index - 1
         WHERE workspace_id = ?1 AND status = ?2 AND order_index > ?3",
        table(kind)
    );
    conn.execute(&sql, params![workspace_id, status, removed_order])
        .context("Failed to close bucket gap")?;
    Ok(())
}

/// Shift every item at or after `order` in the bucket up by one.
fn open_gap_in(conn: &Connection, kind: BoardKind, workspace_id: i64, status: &str, order: i32) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET order_index = order_index + 1
         WHERE workspace_id = ?1 AND status = ?2 AND order_index >= ?3",
        table(kind)
    );
    conn.execute(&sql, params![workspace_id, status, order])
        .context("Failed to open bucket gap")?;
    Ok(())
}

fn apply_patch_placement(
    conn: &Connection,
    kind: BoardKind,
    workspace_id: i64,
    id: i64,
    (from_status, from_order): (&str, i32),
    (to_status, to_order): (Option<&str>, Option<i32>),
) -> Result<()> {
    match to_status.filter(|s| *s != from_status) {
        Some(status) => {
            let end = next_order_in(conn, kind, workspace_id, status)?;
            let order = match to_order {
                Some(o) => o.clamp(0, end),
                None => end,
            };
            open_gap_in(conn, kind, workspace_id, status, order)?;
            set_placement_in(conn, kind, id, status, order)?;
            close_gap_in(conn, kind, workspace_id, from_status, from_order)?;
        }
        None => {
            if let Some(order) = to_order {
                set_placement_in(conn, kind, id, from_status, order)?;
            }
        }
    }
    Ok(())
}

fn delete_placed(conn: &Connection, kind: BoardKind, id: i64) -> Result<bool> {
    let tx = conn
        .unchecked_transaction()
        .context("Failed to begin transaction")?;
    let sql = format!(
        "SELECT workspace_id, status, order_index FROM {} WHERE id = ?1",
        table(kind)
    );
    let placement: Option<(i64, String, i32)> = tx
        .query_row(&sql, params![id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .optional()
        .context("Failed to query placement")?;
    let Some((workspace_id, status, order)) = placement else {
        return Ok(false);
    };
    tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table(kind)), params![id])
        .context("Failed to delete item")?;
    close_gap_in(&tx, kind, workspace_id, &status, order)?;
    tx.commit().context("Failed to commit delete")?;
    Ok(true)
}

// ── Row mapping ───────────────────────────────────────────────────────

const ISSUE_COLUMNS: &str = "id, workspace_id, owner_id, title, content, status, label, order_index, assigned_to, project_id, created_at, updated_at";

const PROJECT_COLUMNS: &str = "id, workspace_id, owner_id, title, summary, content, status, label, order_index, lead, members, start_date, end_date, created_at, updated_at";

fn workspace_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        invite_code: row.get(3)?,
        members: Vec::new(),
        created_at: row.get(4)?,
    })
}

fn milestone_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        project_id: row.get(1)?,
        owner_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn comment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        owner_id: row.get(2)?,
        value: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

struct IssueRow {
    id: i64,
    workspace_id: i64,
    owner_id: String,
    title: String,
    content: String,
    status: String,
    label: Option<String>,
    order: i32,
    assigned_to: String,
    project_id: Option<i64>,
    created_at: String,
    updated_at: String,
}

fn issue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok(IssueRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        owner_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        status: row.get(5)?,
        label: row.get(6)?,
        order: row.get(7)?,
        assigned_to: row.get(8)?,
        project_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl IssueRow {
    fn into_issue(self) -> Result<Issue> {
        let status = IssueStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse issue status")?;
        let label = parse_label(self.label.as_deref())?;
        let assigned_to: Vec<UserId> = serde_json::from_str(&self.assigned_to)
            .context("Failed to parse issue assignees JSON")?;

        Ok(Issue {
            id: self.id,
            workspace_id: self.workspace_id,
            owner_id: self.owner_id,
            title: self.title,
            content: self.content,
            status,
            label,
            order: self.order,
            assigned_to,
            project_id: self.project_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ProjectRow {
    id: i64,
    workspace_id: i64,
    owner_id: String,
    title: String,
    summary: String,
    content: String,
    status: String,
    label: Option<String>,
    order: i32,
    lead: Option<String>,
    members: String,
    start_date: Option<String>,
    end_date: Option<String>,
    created_at: String,
    updated_at: String,
}

fn project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        owner_id: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        content: row.get(5)?,
        status: row.get(6)?,
        label: row.get(7)?,
        order: row.get(8)?,
        lead: row.get(9)?,
        members: row.get(10)?,
        start_date: row.get(11)?,
        end_date: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl ProjectRow {
    fn into_project(self) -> Result<Project> {
        let status = ProjectStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse project status")?;
        let label = parse_label(self.label.as_deref())?;
        let members: Vec<UserId> = serde_json::from_str(&self.members)
            .context("Failed to parse project members JSON")?;

        Ok(Project {
            id: self.id,
            workspace_id: self.workspace_id,
            owner_id: self.owner_id,
            title: self.title,
            summary: self.summary,
            content: self.content,
            status,
            label,
            order: self.order,
            lead: self.lead,
            members,
            start_date: parse_date(self.start_date.as_deref())?,
            end_date: parse_date(self.end_date.as_deref())?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_label(raw: Option<&str>) -> Result<Option<Label>> {
    raw.map(|l| {
        Label::from_str(l)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse label")
    })
    .transpose()
}

fn parse_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|d| {
        DateTime::parse_from_rfc3339(d)
            .map(|d| d.with_timezone(&Utc))
            .with_context(|| format!("Failed to parse date '{}'", d))
    })
    .transpose()
}
