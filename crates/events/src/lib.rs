//! Spriteforge event bus.
//!
//! In-process publish/subscribe hub for job lifecycle updates, backed by
//! `tokio::sync::broadcast`. The IPC event publisher subscribes here and
//! forwards every update onto the wire.

pub mod bus;

pub use bus::EventBus;
