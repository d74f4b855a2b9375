//! The project bridge's main loop: filesystem watcher, pull poller, push
//! poller, session heartbeat, and build executor.

pub mod bridge_loop;
pub mod build_executor;
pub mod pull;
pub mod push;
pub mod session_heartbeat;
pub mod watcher;


pub use bridge_loop::run_bridge_loop;
pub use bridge_loop::BridgeLoopConfig;
pub use build_executor::is_command_allowed;
pub use build_executor::run_build;
pub use watcher::ProjectWatcher;
pub use watcher::Suppressions;
pub use watcher::WatchEvent;
pub use watcher::WatcherError;
