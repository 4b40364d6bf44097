//! Common utilities and types shared across the relay.

pub mod address;
pub mod error;
pub mod net;

pub use address::Address;
pub use error::{Error, Result};
