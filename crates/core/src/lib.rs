//! # Windlass Core
//!
//! Domain types, traits, and error definitions for the Windlass agent
//! orchestration runtime. This crate has **zero framework dependencies** —
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the agent loop talks to is defined as a trait here:
//! the model invocation channel, conversation memory, tools and their
//! factories, and dynamic tool catalogs. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod memory;
pub mod model;
pub mod output;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDefinition, LlmSpec};
pub use error::{Error, MemoryError, ModelError, PromptError, Result, ToolError};
pub use memory::{ConversationMemory, Interaction, InteractionRecord, InteractionUpdate};
pub use model::{ModelChannel, ModelRequest, ModelResponse};
pub use output::{AgentOutput, OutputData, OutputItem};
pub use session::{AgentSession, SessionId};
pub use tool::{Tool, ToolCatalog, ToolFactory, ToolRegistry, ToolSpec};
