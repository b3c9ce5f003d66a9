//! Userspace pseudo-filesystem emulating a hierarchical control-group
//! view on platforms without native cgroup support. A [`Manager`]
//! holds the in-memory tree, process index and notify server behind
//! one lock; any [`host::FilesystemHost`] adapter drives it from the
//! outside.

pub mod attr;
pub mod config;
pub mod error;
pub mod handle;
pub mod host;
pub mod manager;
mod node;
mod notify;
mod pid_index;
#[cfg(test)]
mod tests;
mod tree;
mod watcher;

pub use attr::Attr;
pub use config::Config;
pub use error::{Error, Result};
pub use handle::HandleId;
pub use host::FilesystemHost;
pub use manager::Manager;
pub use node::{NodeId, NodeKind};
pub use notify::ExitRecord;
