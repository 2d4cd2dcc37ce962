//! Orchestrator/subagent/refiner loop for Foreman.
//!
//! A run breaks an objective into subtasks, executes each one with a subagent
//! backend, consolidates every era with a refiner and packages the final
//! deliverable into a zip archive.

pub mod artifact;
pub mod config;
pub mod continuation;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod prompt;
pub mod retry;
pub mod run;
pub mod search;
pub mod store;

pub use artifact::{Extraction, ExtractionIssue};
pub use config::{ModelConfig, RetrySettings, Role, RoleConfig, SearchSettings};
pub use continuation::{Checkpoint, ContinuationController, ContinuedReply};
pub use dispatch::{Dispatcher, Reply, RoleModels};
pub use engine::{Orchestrator, RunOutput};
pub use events::{RunEvent, TraceEntry, TraceLog};
pub use retry::RetryPolicy;
pub use run::AgentRun;
pub use search::{SearchAdapter, SearchError, SearchProvider, TavilyProvider};
pub use store::{ArchiveStore, StoredArchive};

// Re-export orchestration error separately to avoid conflicts
pub use error::OrchestrationError;
