//! Unix-socket control surface for the daemon.

mod runtime;
mod server;

pub use runtime::socket_path;
pub use server::{client_request, run_daemon};
