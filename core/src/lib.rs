//! stagepay-core: staged subscription workflow backed by a durable record store.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod locks;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod subscription;
pub mod types;
pub mod withdrawal;
