//! Agent process management.
//!
//! - `handle`: the spawned child and its liveness
//! - `stream`: merged stdout/stderr line stream
//! - `gate`: startup handshake state machine
//! - `monitor`: background reader feeding history and gate
//! - `shutdown`: process-tree termination
//! - `exit_hook`: tree teardown when the host itself is terminated
//! - `supervisor`: `AgentProcess`, the public lifecycle

mod exit_hook;
mod gate;
mod handle;
mod monitor;
mod shutdown;
mod stream;
mod supervisor;

pub use exit_hook::{ExitHookGuard, kill_registered};
pub use gate::{StartupGate, StartupState};
pub use handle::{ProcessHandle, ProcessLiveness};
pub use monitor::{ProcessMonitor, Readiness};
pub use shutdown::{descendant_pids, kill_pid, shutdown_child, terminate_pid};
pub use stream::{LineStream, line_stream, merged_output};
pub use supervisor::AgentProcess;
