//! Client library for ComfyUI-compatible render services.
//!
//! Provides the HTTP API wrapper, event-stream connection, typed message
//! parsing, workflow templating, output manifest parsing, and the
//! [`job::JobRunner`] that ties them into one render job.

pub mod api;
pub mod client;
pub mod history;
pub mod job;
pub mod messages;
pub mod stream;
pub mod workflow;
