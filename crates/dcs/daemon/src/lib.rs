//! DCS Daemon - HTTP boundary of the Digital Contracting Service
//!
//! The daemon provides:
//! - REST API over the template repository, contract workflow engine,
//!   audit ledger and revocation reactor
//! - A sweeper that expires overdue signing sessions and deployment attempts
//! - Layered configuration (defaults, file, `DCS_` environment)

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod services;
pub mod sweeper;
pub mod target;

pub use config::DcsConfig;
pub use error::{ApiError, ApiResult, DaemonError, DaemonResult};
pub use server::Server;
pub use services::Services;
pub use sweeper::{SweepReport, Sweeper};
pub use target::HttpTargetSystem;
