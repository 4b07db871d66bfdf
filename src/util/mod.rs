//! Shared utilities: timing helpers and logging setup

pub mod logging;
pub mod time;
