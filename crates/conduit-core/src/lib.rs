#![allow(clippy::must_use_candidate)]

//! Records and error classification shared by the conduit crates

mod error;
mod records;

pub use error::{ClassifiedError, ErrorKind};
pub use records::{ApiKey, ProviderConfig, RateLimit, RateLimitUnit, VirtualKeyConfig};
