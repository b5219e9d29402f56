pub mod loader;
pub mod schema;

pub use loader::{discover, load_from_path, load_from_str, locate, ConfigError};
pub use schema::{
    CodecConfig, NetlistConfig, TrailerConfig, ValidationError, ValidationIssue,
};
