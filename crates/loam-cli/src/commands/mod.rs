pub mod add;
pub mod common;
pub mod conflicts;
pub mod delete;
pub mod list;
pub mod status;
pub mod sync;
pub mod watch;
