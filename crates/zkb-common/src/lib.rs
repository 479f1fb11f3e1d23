//! ---
//! zkb_section: "01-common"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Shared primitives for the zkbench workspace."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
//! Configuration loading and logging setup consumed by the harness and the
//! `zkbench` binary.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BackendKind, ChildMode, LoadedAppConfig, LoggingConfig, MemoryBackendConfig,
    RunConfig, StopPolicy, SubmissionStrategy,
};
pub use logging::{init_tracing, LogFormat};
