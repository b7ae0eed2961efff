//! Domain types and pure logic shared by the Noonsong crates.
//!
//! Nothing in here performs network I/O. File access is limited to the
//! helpers that read and write the prompt document.

pub mod assembly;
pub mod error;
pub mod prompts;
pub mod segments;
pub mod subtitles;
pub mod types;
