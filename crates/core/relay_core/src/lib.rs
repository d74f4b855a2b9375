//! Connection-lifecycle machinery shared by the relay daemon: the
//! reconnect supervisor, its heartbeat loop and outbound poller, the
//! at-most-once delivery cache, and process exit codes.

pub mod delivered_ids;
pub mod exit_code;
pub mod heartbeat;
pub mod outbound_poller;
pub mod supervisor;

pub use delivered_ids::DeliveredIds;
pub use exit_code::ExitCode;
pub use heartbeat::start_heartbeat_loop;
pub use outbound_poller::start_outbound_poller;
pub use outbound_poller::PollerOutcome;
pub use supervisor::ExitOutcome;
pub use supervisor::RelaySupervisor;
