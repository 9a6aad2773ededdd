//! WebSocket surface: pushes snapshots, accepts viewer commands

pub mod handler;
pub mod protocol;
