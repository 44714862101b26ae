//! # confsync core
//!
//! Keeps local configuration files in sync with a key/value store. Values
//! are fetched through a [`backend::StoreClient`], rendered into Handlebars
//! templates and written atomically to their destinations, either once or
//! continuously under a [`supervisor::Supervisor`].
//!
//! ## Modules
//!
//! - [`backend`]: Redis (RESP2 with lazy reconnect) and in-memory stores
//! - [`template`]: resource loading, rendering and the continuous processors
//! - [`supervisor`]: run-mode selection, signal handling and drain
//! - [`admin`]: HTTP health and key management endpoints
//! - [`config`]: layered configuration via figment

pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod persistence;
pub mod supervisor;
pub mod template;

pub use backend::{
    BackendCapabilities, BackendConfig, BackendKind, KeyValueMap, MemoryStore, RedisStoreClient,
    SharedStore, StoreClient, new_store_client,
};
pub use config::{ConfigOverrides, ConfsyncConfig, load_config};
pub use error::{ConfsyncError, FetchError, StoreError, TemplateError};
pub use supervisor::{RunMode, RunSummary, Supervisor, SupervisorState};
pub use template::{TemplateEngine, TemplateResource};
