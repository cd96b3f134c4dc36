//! Farol Server - REST API and process composition
//!
//! This crate exposes the registry over the v4 REST surface and a
//! websocket push endpoint, reads configuration from the environment and
//! owns startup/shutdown of the component graph.

pub mod api;
pub mod config;
pub mod middleware;
pub mod model;
pub mod startup;
