use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque id of an authenticated user, issued by the identity provider.
pub type UserId = String;

// ── Status and label vocabularies ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueStatus {
    Backlog,
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 5] = [
        Self::Backlog,
        Self::Todo,
        Self::InProgress,
        Self::Done,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "BACKLOG",
            Self::Todo => "TODO",
            Self::InProgress => "INPROGRESS",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BACKLOG" => Ok(Self::Backlog),
            "TODO" => Ok(Self::Todo),
            "INPROGRESS" => Ok(Self::InProgress),
            "DONE" => Ok(Self::Done),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid issue status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Backlog,
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 5] = [
        Self::Backlog,
        Self::Planned,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "BACKLOG",
            Self::Planned => "PLANNED",
            Self::InProgress => "INPROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BACKLOG" => Ok(Self::Backlog),
            "PLANNED" => Ok(Self::Planned),
            "INPROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

/// Label vocabulary shared by issues and projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Bug,
    Feature,
    Improvement,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "BUG",
            Self::Feature => "FEATURE",
            Self::Improvement => "IMPROVEMENT",
        }
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUG" => Ok(Self::Bug),
            "FEATURE" => Ok(Self::Feature),
            "IMPROVEMENT" => Ok(Self::Improvement),
            _ => Err(format!("Invalid label: {}", s)),
        }
    }
}

/// Direction of an assignee/member change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssignType {
    Assign,
    Remove,
}

/// Which of the two boards of a workspace an item or drag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    Issues,
    Projects,
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issues => f.write_str("issues"),
            Self::Projects => f.write_str("projects"),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub owner_id: UserId,
    pub invite_code: String,
    pub members: Vec<UserId>,
    pub created_at: String,
}

impl Workspace {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.members.iter().any(|m| m == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub workspace_id: i64,
    pub owner_id: UserId,
    pub title: String,
    pub content: String,
    pub status: IssueStatus,
    pub label: Option<Label>,
    pub order: i32,
    pub assigned_to: Vec<UserId>,
    pub project_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub workspace_id: i64,
    pub owner_id: UserId,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub status: ProjectStatus,
    pub label: Option<Label>,
    pub order: i32,
    pub lead: Option<UserId>,
    pub members: Vec<UserId>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    /// Elapsed share of the `[start_date, end_date]` window, clamped to 0..=100.
    pub fn completion_percent(&self, now: DateTime<Utc>) -> Option<u8> {
        let (start, end) = (self.start_date?, self.end_date?);
        if now < start {
            return Some(0);
        }
        if now > end {
            return Some(100);
        }
        let total = (end - start).num_milliseconds();
        if total <= 0 {
            return Some(100);
        }
        let elapsed = (now - start).num_milliseconds();
        Some(((elapsed * 100) / total) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub project_id: i64,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub issue_id: i64,
    pub owner_id: UserId,
    pub value: String,
    pub created_at: String,
    pub updated_at: String,
}

// ── Partial updates ───────────────────────────────────────────────────

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) when deserializing nullable patch fields.
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<IssueStatus>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub label: Option<Option<Label>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<i64>>,
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the patch only rewrites `order` (a bulk drag-commit step).
    pub fn is_order_only(&self) -> bool {
        self.order.is_some()
            && Self {
                order: None,
                ..self.clone()
            }
            .is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub label: Option<Option<Label>>,
    #[serde(default, deserialize_with = "double_option")]
    pub lead: Option<Option<UserId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_date: Option<Option<DateTime<Utc>>>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_order_only(&self) -> bool {
        self.order.is_some()
            && Self {
                order: None,
                ..self.clone()
            }
            .is_empty()
    }
}

// ── Bucketed boards ───────────────────────────────────────────────────

/// A status enum usable as a board column key.
pub trait BucketKey:
    Copy + Ord + Eq + Hash + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Every column, in display order.
    fn all() -> &'static [Self];
    fn name(&self) -> &'static str;
}

impl BucketKey for IssueStatus {
    fn all() -> &'static [Self] {
        &Self::ALL
    }
    fn name(&self) -> &'static str {
        self.as_str()
    }
}

impl BucketKey for ProjectStatus {
    fn all() -> &'static [Self] {
        &Self::ALL
    }
    fn name(&self) -> &'static str {
        self.as_str()
    }
}

/// A record that lives in one status column and carries a dense `order`.
pub trait BoardItem:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Status: BucketKey;
    const KIND: BoardKind;

    fn id(&self) -> i64;
    fn workspace_id(&self) -> i64;
    fn status(&self) -> Self::Status;
    fn order(&self) -> i32;
    fn place(&mut self, status: Self::Status, order: i32);
}

impl BoardItem for Issue {
    type Status = IssueStatus;
    const KIND: BoardKind = BoardKind::Issues;

    fn id(&self) -> i64 {
        self.id
    }
    fn workspace_id(&self) -> i64 {
        self.workspace_id
    }
    fn status(&self) -> IssueStatus {
        self.status
    }
    fn order(&self) -> i32 {
        self.order
    }
    fn place(&mut self, status: IssueStatus, order: i32) {
        self.status = status;
        self.order = order;
    }
}

impl BoardItem for Project {
    type Status = ProjectStatus;
    const KIND: BoardKind = BoardKind::Projects;

    fn id(&self) -> i64 {
        self.id
    }
    fn workspace_id(&self) -> i64 {
        self.workspace_id
    }
    fn status(&self) -> ProjectStatus {
        self.status
    }
    fn order(&self) -> i32 {
        self.order
    }
    fn place(&mut self, status: ProjectStatus, order: i32) {
        self.status = status;
        self.order = order;
    }
}

/// Items of one workspace bucketed by status, each bucket in list order.
///
/// Serializes as a JSON object keyed by status name. Missing keys read as
/// empty buckets, so two boards compare equal whenever every column holds
/// the same items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent, bound(serialize = "", deserialize = ""))]
pub struct Board<T: BoardItem> {
    buckets: BTreeMap<T::Status, Vec<T>>,
}

impl<T: BoardItem> Default for Board<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: BoardItem> Board<T> {
    pub fn empty() -> Self {
        let buckets = T::Status::all()
            .iter()
            .map(|s| (*s, Vec::new()))
            .collect();
        Self { buckets }
    }

    /// Bucket records by status and sort each bucket by `order` (ties by id).
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut board = Self::empty();
        for item in items {
            board.bucket_mut(item.status()).push(item);
        }
        for bucket in board.buckets.values_mut() {
            bucket.sort_by_key(|i| (i.order(), i.id()));
        }
        board
    }

    pub fn bucket(&self, status: T::Status) -> &[T] {
        self.buckets.get(&status).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bucket_mut(&mut self, status: T::Status) -> &mut Vec<T> {
        self.buckets.entry(status).or_default()
    }

    pub fn buckets(&self) -> impl Iterator<Item = (T::Status, &[T])> {
        T::Status::all().iter().map(|s| (*s, self.bucket(*s)))
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.buckets.values().flatten().find(|i| i.id() == id)
    }

    /// Status and list index of the item with `id`.
    pub fn locate(&self, id: i64) -> Option<(T::Status, usize)> {
        self.buckets.iter().find_map(|(status, items)| {
            items
                .iter()
                .position(|i| i.id() == id)
                .map(|idx| (*status, idx))
        })
    }

    /// Rewrite every item in `status` to `(status, list index)`.
    pub fn renumber(&mut self, status: T::Status) {
        for (idx, item) in self.bucket_mut(status).iter_mut().enumerate() {
            item.place(status, idx as i32);
        }
    }

    pub fn renumber_all(&mut self) {
        for status in T::Status::all() {
            self.renumber(*status);
        }
    }

    /// True when every item sits in the bucket named by its status with
    /// `order` equal to its list index.
    pub fn is_dense(&self) -> bool {
        self.buckets.iter().all(|(status, items)| {
            items
                .iter()
                .enumerate()
                .all(|(idx, i)| i.status() == *status && i.order() == idx as i32)
        })
    }

    /// Target `(id, status, order)` of every item, derived from list position.
    pub fn placements(&self) -> Vec<(i64, T::Status, i32)> {
        self.buckets()
            .flat_map(|(status, items)| {
                items
                    .iter()
                    .enumerate()
                    .map(move |(idx, i)| (i.id(), status, idx as i32))
            })
            .collect()
    }

    /// Ids that occur more than once across all buckets.
    pub fn duplicate_ids(&self) -> Vec<i64> {
        let mut seen = std::collections::HashSet::new();
        let mut dups = Vec::new();
        for item in self.buckets.values().flatten() {
            if !seen.insert(item.id()) && !dups.contains(&item.id()) {
                dups.push(item.id());
            }
        }
        dups
    }
}

impl<T: BoardItem> PartialEq for Board<T> {
    fn eq(&self, other: &Self) -> bool {
        T::Status::all()
            .iter()
            .all(|s| self.bucket(*s) == other.bucket(*s))
    }
}

// ── API view types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetail {
    pub issue: Issue,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub milestones: Vec<Milestone>,
    pub completion_percent: Option<u8>,
}
