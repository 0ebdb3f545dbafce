//! # VaultFM Engine
//!
//! Sandboxed, encryption-aware file management for one or more configured
//! roots ("instances").
//!
//! ## Overview
//!
//! Every request names an instance and carries virtual paths relative to
//! that instance's root. The engine:
//!
//! - **Confines paths**: resolution never leaves the instance root
//! - **Enforces quotas**: storage, compression and upload limits are checked before writing
//! - **Encrypts at rest**: file content is sealed with the `envelope` codec when enabled
//! - **Resolves collisions**: new names get a ` (n)` suffix instead of overwriting
//! - **Recycles deletes**: removed items go to a per-instance recycle bin
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Dispatcher                         │
//! │        (disabled-op check, spawn_blocking, scrub)        │
//! ├──────────────────────────────────────────────────────────┤
//! │                   Instance Registry                      │
//! ├──────────────┬──────────────┬──────────────┬─────────────┤
//! │   Listing    │  Operations  │   Archive    │  Transfer   │
//! ├──────────────┴──────────────┴──────────────┴─────────────┤
//! │      Sandbox      │    Quota Guard    │  Naming  │ Codec │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use engine::{Dispatcher, InstanceConfig, InstanceRegistry, Request, Response};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(InstanceRegistry::new());
//!     registry.register(InstanceConfig::new("docs", "/srv/docs"))?;
//!
//!     let dispatcher = Dispatcher::new(registry);
//!     let response = dispatcher
//!         .dispatch("docs", Request::List { path: "/".into() })
//!         .await?;
//!     if let Response::Listing(listing) = response {
//!         println!("{}", serde_json::to_string_pretty(&listing)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration and per-instance settings
//! - [`error`]: Error taxonomy and root scrubbing
//! - [`files`]: Path sandbox, quotas, naming and file operations
//! - [`registry`]: Instance registry
//! - [`router`]: Request types and the dispatcher

pub mod config;
pub mod error;
pub mod files;
pub mod registry;
pub mod router;

// Re-export config types for convenience
pub use config::{BatchPolicy, Config, ConfigError, EngineConfig, InstanceConfig};

// Re-export error types for convenience
pub use error::{EngineError, QuotaLimit, Result};

// Re-export file types for convenience
pub use files::{Disposition, FileDetail, FileStream, FolderDetail, FolderListing, Preview};

// Re-export registry types for convenience
pub use registry::{Instance, InstanceRegistry};

// Re-export router types for convenience
pub use router::{Dispatcher, ErrorPayload, OperationKind, Request, Response};
