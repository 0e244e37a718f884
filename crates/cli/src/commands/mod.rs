//! Command implementations

pub mod leak;
pub mod oom;
pub mod watch;
