//! HTTP middleware.

pub mod deadline;

pub use deadline::Deadline;
