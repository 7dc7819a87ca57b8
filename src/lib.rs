pub mod args;
pub mod config;
pub mod r#const;
pub mod error;
pub mod metrics;
pub mod server;

pub use crate::metrics::METRICS;
