//! CLI command implementations

mod daemon;
mod index;

pub use daemon::cmd_daemon;
pub use index::{Target, cmd_delete, cmd_info, cmd_search, cmd_update, cmd_version};
