pub mod account;
pub mod completions;
pub mod files;
pub mod logs;
pub mod status;
pub mod sync;
