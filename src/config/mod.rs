//! Configuration
//!
//! `AppConfig` is read from an optional JSON file, overridden from the
//! command line and validated before anything is started.

mod loader;
mod schema;

pub use schema::*;
