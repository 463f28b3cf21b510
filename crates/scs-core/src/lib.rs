//! Core types shared by every scs crate: the environment-driven [`Config`],
//! the [`error::ScsError`] taxonomy, field validation for the flat-file
//! record format, and logging/time helpers.

pub mod config;
pub mod error;
pub mod fields;
pub mod logging;
pub mod time;

pub use config::Config;
pub use error::{Result, ScsError};
