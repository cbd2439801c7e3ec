//! Master Control Program (MCP) for Marco
//!
//! Turns free-form user text into schema-validated intents and dispatches
//! them to capability modules.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Front-end (terminal, tests, ...)                    │
//! └─────────────────────────────────────────────────────────────────┘
//!          │ submit_command / cancel        ▲ ask_user / confirm
//!          ▼                                │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  crates/marco_mcp/                               │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                    Intent Pipeline                        │   │
//! │  ├──────────────────────────────────────────────────────────┤   │
//! │  │  Classifier     │ backend prompt, timeout, one retry      │   │
//! │  │  Disambiguation │ resolve / clarify / unresolved          │   │
//! │  │  Validation     │ schema check against the registry       │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                    Orchestrator                           │   │
//! │  ├──────────────────────────────────────────────────────────┤   │
//! │  │  Registry       │ sealed at startup, lock-free lookups    │   │
//! │  │  Workflow       │ per-command state machine + snapshots   │   │
//! │  │  Policy         │ timeouts, retries, confirmation         │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │ Module::execute
//!                               ▼
//!                  fs, (learning platform), ...
//! ```
//!
//! # Design Principles
//!
//! 1. **Modules registered once:** the registry is sealed before the first
//!    command and read-only afterwards.
//!
//! 2. **Ask, don't guess:** low-confidence or incomplete intents turn into
//!    field-scoped questions, bounded by a round budget.
//!
//! 3. **Destructive means confirmed:** nothing destructive is dispatched
//!    without an explicit yes, and nothing destructive is retried.
//!
//! 4. **Cancellation is an outcome:** a cancelled destructive action is
//!    reported as uncertain, never as success or failure.

pub mod cancel;
pub mod classifier;
pub mod disambiguation;
pub mod error;
pub mod frontend;
pub mod module;
pub mod modules;
pub mod orchestrator;
pub mod policy;
pub mod registry;

// Re-exports for convenience
pub use cancel::CancellationToken;
pub use classifier::{
    BackendError, Classifier, ClassifierAdapter, ClassifierBackend, ClassifierError,
    ClassifyContext, Prompt,
};
pub use disambiguation::{resolve, Resolution};
pub use error::{CommandOutcome, CommandReport, McpError};
pub use frontend::{Answer, Frontend, FrontendError};
pub use module::{Module, ModuleError};
pub use modules::{FsConfig, FsModule};
pub use orchestrator::{CommandHandle, Mcp, RegistryRef};
pub use policy::{DisambiguationPolicy, McpPolicy, PolicyError};
pub use registry::{CapabilityRegistry, RegistryError};
