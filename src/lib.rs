// ABOUTME: Library crate for dev-swap, swapping a running service container for a dev build
// Exposes the executor, container, watcher and swap layers for the binary and integration tests

pub mod config;
pub mod docker;
pub mod executor;
pub mod swap;
pub mod watcher;
