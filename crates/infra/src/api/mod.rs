//! HTTP surface of the inventory backend.

pub mod client;

pub use client::{BackendClient, BackendClientConfig};
