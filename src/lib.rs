#![forbid(unsafe_code)]

pub mod aggregate;
pub mod api;
pub mod config;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod ids;
pub mod logging;
pub mod media;
pub mod security;
pub mod store;
