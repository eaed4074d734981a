//! Infrastructure layer
//!
//! Handles all I/O operations: git, the filesystem, external processes,
//! host resource sampling, and the structured build logs.

pub mod buildlog;
pub mod git;
pub mod lockfile;
pub mod resources;
pub mod signals;
pub mod subprocess;
