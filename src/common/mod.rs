//! Common utilities and types shared across fleetcoord

pub mod config;
pub mod encoding;
pub mod error;

pub use config::{Config, CoordinatorConfig};
pub use encoding::{decode_records, encode_records, WantedState};
pub use error::{Error, Result};
