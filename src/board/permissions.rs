//! Ownership, assignment and membership checks.
//!
//! Each predicate answers one question about one loaded record. The gateway
//! turns a `false` into `BoardError::PermissionDenied` before any write.

use super::models::{Comment, Issue, Milestone, Project, Workspace};

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    fn is(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    // ── Workspace ─────────────────────────────────────────────────────

    pub fn is_member_of(&self, workspace: &Workspace) -> bool {
        workspace.is_member(&self.user_id)
    }

    /// Rename, delete and member removal.
    pub fn can_manage_workspace(&self, workspace: &Workspace) -> bool {
        self.is(&workspace.owner_id)
    }

    // ── Issue ─────────────────────────────────────────────────────────

    /// Update and delete: the owner or any assignee.
    pub fn can_edit_issue(&self, issue: &Issue) -> bool {
        self.is(&issue.owner_id) || issue.assigned_to.iter().any(|a| self.is(a))
    }

    /// Only the owner changes the assignee set.
    pub fn can_assign_issue(&self, issue: &Issue) -> bool {
        self.is(&issue.owner_id)
    }

    // ── Project ───────────────────────────────────────────────────────

    /// Update: the owner, the lead, or any member.
    pub fn can_edit_project(&self, project: &Project) -> bool {
        self.can_staff_project(project) || project.members.iter().any(|m| self.is(m))
    }

    /// Delete is narrower than update: owner or lead.
    pub fn can_delete_project(&self, project: &Project) -> bool {
        self.can_staff_project(project)
    }

    /// Lead and member assignment: owner or lead.
    pub fn can_staff_project(&self, project: &Project) -> bool {
        self.is(&project.owner_id) || project.lead.as_deref().is_some_and(|l| self.is(l))
    }

    // ── Child records ─────────────────────────────────────────────────

    pub fn can_edit_comment(&self, comment: &Comment) -> bool {
        self.is(&comment.owner_id)
    }

    pub fn can_edit_milestone(&self, milestone: &Milestone) -> bool {
        self.is(&milestone.owner_id)
    }
}
