pub mod common;
pub mod completions;
pub mod delete;
pub mod list;
pub mod save;
pub mod sync;
