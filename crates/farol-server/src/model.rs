//! Shared server state.

use std::sync::Arc;

use farol_registry::Registry;

use crate::config::Configuration;

/// Application state handed to every handler. The component graph is
/// built once in `main` and passed around explicitly.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub configuration: Arc<Configuration>,
}
