pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{DragnetError, FailureKind, FetchError};
pub use types::*;
