//! Render pipeline: configuration, the wave scheduler, and the stages
//! around it (segment planning before rendering, merging after).

pub mod artifacts;
pub mod config;
pub mod media;
pub mod merge;
pub mod render;
pub mod scheduler;
pub mod segment_plan;
