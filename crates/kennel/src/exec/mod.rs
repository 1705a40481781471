//! Process execution: the monitor, its console and OCI hooks.

pub mod console;
pub mod hooks;
pub mod monitor;
pub mod process;
pub mod pty;

pub use hooks::run_hooks;
pub use monitor::{ConsoleMode, capture_env};
pub use process::{is_alive, parse_signal, send_signal};
