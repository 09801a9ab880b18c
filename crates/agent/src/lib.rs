//! The Windlass reasoning loop — the heart of the runtime.
//!
//! The loop follows a **Thought → Action → Observation** cycle:
//!
//! 1. **Assemble** a prompt from templates, tool descriptions, chat
//!    history, and runtime context
//! 2. **Dispatch** it to the model via the configured channel
//! 3. **Parse** the reply into a structured decision (tool call vs. final
//!    answer), across provider dialects
//! 4. **If a tool was requested**: invoke it, fold the observation back
//!    into the scratchpad, and loop back to step 2
//! 5. **If a final answer emerged**: persist it and return
//!
//! The loop continues until a final answer is produced or the iteration
//! budget is exhausted. Every step is recorded in the trace.

pub mod function_calling;
pub mod invoker;
pub mod parser;
pub mod prompt;
pub mod runner;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use function_calling::{FunctionCalling, FunctionCallingFactory};
pub use invoker::{Observation, build_tool_params, invoke_tool};
pub use parser::{IterationState, PathConfig, ResponseDialect, parse_model_output};
pub use prompt::PromptAssembler;
pub use runner::{ReactRunner, RunnerConfig};
pub use trace::{AdditionalInfo, Scratchpad, TraceRecorder, TraceStep};
