//! Various data structures, etc.

pub mod ns;
pub mod once;
