// Per-site storage: multiversion variables, lock tables, and the site
// (data manager) that owns them.

pub mod lock_manager;
pub mod site;
pub mod variable;

pub use lock_manager::{Lock, LockKind, LockManager};
pub use site::{Site, SiteEvent};
pub use variable::{StagedWrite, Variable, Version};
