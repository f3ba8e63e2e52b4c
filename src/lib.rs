pub mod config;
pub mod core;
pub mod datastreams;
pub mod error;

// Scripted transport shared by unit and integration tests.
#[doc(hidden)]
pub mod test_utils;

pub use config::Config;
pub use error::{Result, TracerError};
