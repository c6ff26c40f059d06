pub mod cli;
pub mod config;
pub mod domain;  // Domain Events
pub mod error;
pub mod infra;
pub mod logging;
pub mod model;
pub mod repository;
pub mod rpc;
pub mod service;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use model::*;
