//! Board: workspace-scoped issue and project boards with realtime sync.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, build_gateway)         │
//! │  tab     │ <─────── │    ├─ api.rs  (route handlers, Caller, ApiError) │
//! └──────────┘ WebSocket│    └─ ws.rs   (per-workspace event stream)       │
//!      │                │         │                                        │
//!      │                │         v                                        │
//!      │                │  gateway.rs  (validate → authorize → persist     │
//!      │                │               → publish)                         │
//!      │                │     │            │               │               │
//!      │                │     v            v               v               │
//!      │                │  permissions  db.rs (SQLite)  events.rs (bus)    │
//!      │                └──────────────────────────────────────────────────┘
//!      v
//!  client.rs  (ClientBoard: optimistic view + confirmed snapshot)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                           |
//! |---------------|----------------------------------------------------------|
//! | `models`      | Records, statuses, patches, the bucketed `Board<T>`      |
//! | `ordering`    | Drag planning and dense re-numbering (pure)              |
//! | `assistant`   | `TextGenerator` trait, prompt building, HTTP backend     |
//!
//! ## Typical Flow (drag a card)
//!
//! 1. `WorkspaceView::on_drag_end()` runs `ordering::plan_move()` against the
//!    view and returns the whole board to submit.
//! 2. `PUT /api/workspaces/{id}/issues/board` → `Gateway::commit_issue_order()`
//!    writes every item whose `(status, order)` changed.
//! 3. The gateway re-reads the board and publishes one
//!    `issue-dragged-and-dropped` event.
//! 4. Every subscribed tab, the originator included, replaces its board with
//!    the payload.

pub mod api;
pub mod assistant;
pub mod client;
pub mod db;
pub mod events;
pub mod gateway;
pub mod models;
pub mod ordering;
pub mod permissions;
pub mod server;
pub mod ws;
