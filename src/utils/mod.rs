//! Generic utility primitives with zero pipeline knowledge.
//!
//! - `command` - Process execution with captured output
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell quoting for display and `sh -c` command lines
//! - `slugify` - Identifier slugs for job and workspace names
//! - `template` - `${{ scope.key }}` expression rendering

pub mod command;
pub mod io;
pub mod shell;
pub mod slugify;
pub mod template;
