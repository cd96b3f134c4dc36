//! Server startup: logging, HTTP binding and graceful shutdown.

pub mod http;
pub mod logging;
pub mod shutdown;

pub use http::registry_server;
pub use logging::{get_subscriber, init_subscriber};
pub use shutdown::{wait_for_shutdown_signal, ShutdownSignal};
