//! Control layer exposing session state to external tooling.

/// High-level control API over a session.
pub mod api;
/// Ratatui-based developer console.
pub mod ui;
