//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → TAGWIRE_* environment overrides
//!     → validation.rs (semantic checks)
//!     → SessionConfig (validated, immutable)
//!     → Context::init snapshots the fabric sections
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a context is created from it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use schema::SessionConfig;
pub use validation::{validate_config, validate_demo, validate_fabric, ValidationError};
pub use schema::{ContextConfig, DemoConfig, EndpointConfig, ObservabilityConfig, WorkerConfig};
