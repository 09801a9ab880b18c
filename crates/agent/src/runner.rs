//! The agent loop controller — an explicit ReAct state machine.
//!
//! States: `Dispatched → Parsed → {ToolRunning → Folded → Dispatched} |
//! Final | MaxIterationsReached`. Both terminal states converge on the
//! same emit path: release every tool instance exactly once, persist the
//! answer into conversation memory when present, and return the output.
//!
//! A single session progresses strictly sequentially: each iteration's
//! model call and tool call fully resolve before the next prompt is
//! built. Tool-level failures never abort the session; a model-call
//! failure is fatal and surfaced to the caller without retry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use windlass_config::AgentSettings;
use windlass_core::agent::AgentDefinition;
use windlass_core::error::{Error, Result};
use windlass_core::memory::{ConversationMemory, InteractionRecord, InteractionUpdate};
use windlass_core::model::{ModelChannel, ModelRequest, ModelResponse};
use windlass_core::output::{
    ADDITIONAL_INFO_FIELD, AgentOutput, OutputItem, PARENT_INTERACTION_ID_FIELD, RESPONSE_FIELD,
    SESSION_ID_FIELD,
};
use windlass_core::session::AgentSession;
use windlass_core::tool::{Tool, ToolCatalog, ToolRegistry, ToolSpec};

use crate::function_calling::{FunctionCalling, FunctionCallingFactory};
use crate::invoker::{Observation, build_tool_params, invoke_tool, unsupported_tool_observation};
use crate::parser::{IterationState, ResponseDialect, parse_model_output};
use crate::prompt::{self, PromptAssembler, templates};
use crate::trace::{AdditionalInfo, Scratchpad, TraceRecorder};

/// Loop configuration. The typed replacement for loop settings that would
/// otherwise hide in a parameter bag.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound on model invocations per run.
    pub max_iterations: u32,

    /// How many past exchanges to preload into the prompt. Zero disables
    /// the preload.
    pub message_history_limit: usize,

    /// Return the full reasoning trace instead of only the final answer.
    pub verbose: bool,

    /// Persist per-iteration trace steps to conversation memory.
    pub trace_enabled: bool,

    /// Append the current date and time to the prompt before each run.
    pub inject_datetime: bool,

    /// chrono format string for the injected datetime.
    pub datetime_format: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            message_history_limit: 10,
            verbose: false,
            trace_enabled: true,
            inject_datetime: false,
            datetime_format: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            message_history_limit: settings.message_history_limit,
            verbose: settings.verbose,
            trace_enabled: settings.trace_enabled,
            inject_datetime: settings.inject_datetime,
            datetime_format: settings.datetime_format.clone(),
        }
    }
}

/// The explicit loop states. One iteration walks
/// `Dispatched → Parsed → ToolRunning → Folded` and back to `Dispatched`.
#[derive(Debug)]
enum LoopState {
    /// The next model call is due.
    Dispatched,
    /// A model response has been classified.
    Parsed(IterationState),
    /// A tool call is in flight.
    ToolRunning(IterationState),
    /// A tool observation is ready to fold into the scratchpad.
    Folded {
        parsed: IterationState,
        observation: Observation,
    },
    /// Terminal: the model declared a final answer.
    Final { answer: String },
    /// Terminal: the iteration budget ran out.
    MaxIterationsReached,
}

enum LoopOutcome {
    Final(String),
    MaxIterations,
}

/// The ReAct loop runner. One runner serves many sessions; per-run state
/// lives on the stack of [`ReactRunner::run`].
pub struct ReactRunner {
    channel: Arc<dyn ModelChannel>,
    registry: Arc<ToolRegistry>,
    memory: Option<Arc<dyn ConversationMemory>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    config: RunnerConfig,
}

impl ReactRunner {
    pub fn new(channel: Arc<dyn ModelChannel>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            channel,
            registry,
            memory: None,
            catalog: None,
            config: RunnerConfig::default(),
        }
    }

    /// Attach conversation memory for history preload and persistence.
    pub fn with_memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach a dynamic tool catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute the loop for one session. The session is owned by this
    /// call; no other loop may touch it concurrently.
    pub async fn run(
        &self,
        agent: &AgentDefinition,
        session: &AgentSession,
    ) -> Result<AgentOutput> {
        // ── Parameters: llm defaults, then agent, then per-run inputs ──
        let mut params: HashMap<String, String> = HashMap::new();
        params.extend(agent.llm.parameters.clone());
        params.extend(agent.parameters.clone());
        params.extend(session.parameters.clone());
        prompt::apply_template_defaults(&mut params);
        if self.config.inject_datetime {
            prompt::inject_datetime(&mut params, self.config.datetime_format.as_deref());
        }
        let question = params.get(prompt::QUESTION).cloned().unwrap_or_default();
        if let Some(tenant) = session.tenant_id.as_ref().or(agent.tenant_id.as_ref()) {
            params.insert("tenant_id".to_string(), tenant.clone());
        }

        // ── Function-calling adapter and response dialect ──
        let adapter =
            FunctionCallingFactory::create(params.get(prompt::LLM_INTERFACE).map(|s| s.as_str()));

        // ── Tool discovery (graceful) and instantiation ──
        let mut tool_specs = agent.tools.clone();
        if let Some(catalog) = &self.catalog {
            match catalog.fetch_tools(agent).await {
                Ok(discovered) => {
                    debug!(count = discovered.len(), "Discovered catalog tools");
                    tool_specs.extend(discovered);
                }
                Err(e) => {
                    warn!(error = %e, "Tool discovery failed, continuing with static tools");
                }
            }
        }

        let dialect = match &adapter {
            Some(adapter) => {
                adapter.configure(&tool_specs, &mut params);
                ResponseDialect::Native(adapter.path_config())
            }
            None => ResponseDialect::Generic,
        };

        let mut tools: HashMap<String, Box<dyn Tool>> = HashMap::new();
        let mut spec_map: HashMap<String, ToolSpec> = HashMap::new();
        let mut tool_order: Vec<String> = Vec::new();
        for spec in &tool_specs {
            let name = spec.tool_name().to_string();
            let tool = self.registry.create(spec)?;
            if tools.insert(name.clone(), tool).is_none() {
                tool_order.push(name.clone());
            }
            spec_map.insert(name, spec.clone());
        }
        let tool_names: BTreeSet<String> = tools.keys().cloned().collect();

        // ── Chat history preload ──
        if let Some(memory) = &self.memory {
            if self.config.message_history_limit > 0 && !params.contains_key(prompt::CHAT_HISTORY)
            {
                let interactions = memory
                    .load_recent(&session.session_id.0, self.config.message_history_limit)
                    .await?;
                if let Some(rendered) = prompt::render_chat_history(&interactions, &params) {
                    params.insert(prompt::CHAT_HISTORY.to_string(), rendered);
                }
            }
        }

        // ── Base prompt: computed once, scratchpad bound per iteration ──
        let registered: HashMap<String, String> = tool_order
            .iter()
            .map(|name| {
                let description = spec_map
                    .get(name)
                    .and_then(|s| s.description.clone())
                    .or_else(|| {
                        tools
                            .get(name)
                            .and_then(|t| t.description().map(str::to_string))
                    })
                    .unwrap_or_default();
                (name.clone(), description)
            })
            .collect();
        let assembler = PromptAssembler::from_params(&params);
        let base_prompt = assembler.assemble(&params, &registered, &tool_order)?;

        let tracer = TraceRecorder::new(
            self.memory.clone(),
            session.session_id.0.clone(),
            session.parent_interaction_id.clone(),
            self.config.trace_enabled,
        );

        let mut scratchpad = Scratchpad::new();
        let mut interactions: Vec<String> = Vec::new();
        let mut additional_info = AdditionalInfo::new();
        let mut trace_items: Vec<OutputItem> = Vec::new();
        let mut last_thought = String::new();
        let mut iteration: u32 = 0;
        let max_iterations = self.config.max_iterations;

        info!(
            agent = %agent.name,
            session = %session.session_id,
            max_iterations,
            tools = tool_order.len(),
            "ReAct loop starting"
        );

        // ── The state machine ──
        let mut state = LoopState::Dispatched;
        let outcome = loop {
            state = match state {
                LoopState::Dispatched => {
                    let response = self
                        .dispatch_model(agent, &params, &base_prompt, &scratchpad, &interactions)
                        .await?;
                    LoopState::Parsed(parse_model_output(&response, &dialect, &tool_names))
                }

                LoopState::Parsed(parsed) => {
                    debug!(iteration, degraded = parsed.parse_degraded, "Parsed model decision");
                    if !parsed.thought.is_empty() {
                        last_thought = parsed.thought.clone();
                    }

                    if let Some(answer) = &parsed.final_answer {
                        if parsed.parse_degraded {
                            warn!(iteration, "Answering from a degraded parse");
                        }
                        LoopState::Final {
                            answer: answer.trim().to_string(),
                        }
                    } else {
                        tracer.record("LLM", &question, &parsed.thought_response).await;
                        trace_items
                            .push(OutputItem::text(RESPONSE_FIELD, parsed.thought_response.clone()));

                        if iteration + 1 >= max_iterations {
                            // Last permitted iteration: report instead of
                            // running the tool.
                            warn!(max_iterations, "Iteration budget exhausted");
                            LoopState::MaxIterationsReached
                        } else {
                            LoopState::ToolRunning(parsed)
                        }
                    }
                }

                LoopState::ToolRunning(parsed) => {
                    let observation = self
                        .execute_tool(&parsed, &tools, &spec_map, &question)
                        .await;
                    LoopState::Folded {
                        parsed,
                        observation,
                    }
                }

                LoopState::Folded {
                    parsed,
                    observation,
                } => {
                    self.fold_observation(
                        &parsed,
                        &observation,
                        &spec_map,
                        &params,
                        adapter.as_deref(),
                        &mut scratchpad,
                        &mut interactions,
                        &mut additional_info,
                        &mut trace_items,
                        &tracer,
                    )
                    .await;
                    iteration += 1;
                    LoopState::Dispatched
                }

                LoopState::Final { answer } => break LoopOutcome::Final(answer),
                LoopState::MaxIterationsReached => break LoopOutcome::MaxIterations,
            };
        };

        // ── Release every tool instance exactly once, on either path ──
        for (_, tool) in tools {
            tool.close().await;
        }

        let answer = match outcome {
            LoopOutcome::Final(answer) => answer,
            LoopOutcome::MaxIterations => {
                let mut text = format!(
                    "Agent reached maximum iterations ({max_iterations}) without completing the task"
                );
                if !last_thought.is_empty() {
                    text = format!("{text}. Last thought: {last_thought}");
                }
                text
            }
        };

        info!(
            session = %session.session_id,
            iterations = iteration + 1,
            "ReAct loop finished"
        );

        self.finish(session, &question, &answer, &additional_info, trace_items, &tracer)
            .await
    }

    // ── Transitions ───────────────────────────────────────────────────

    /// Bind the current scratchpad into the base prompt and invoke the
    /// model. Channel errors are fatal to the session.
    async fn dispatch_model(
        &self,
        agent: &AgentDefinition,
        params: &HashMap<String, String>,
        base_prompt: &str,
        scratchpad: &Scratchpad,
        interactions: &[String],
    ) -> Result<ModelResponse> {
        let mut request_params = params.clone();
        request_params.insert(
            prompt::PROMPT.to_string(),
            PromptAssembler::bind_scratchpad(base_prompt, &scratchpad.render()),
        );
        if !interactions.is_empty() {
            request_params.insert(
                prompt::INTERACTIONS.to_string(),
                format!(", {}", interactions.join(", ")),
            );
        }

        let request = ModelRequest::new(&agent.llm.model_id, request_params);
        let response = self.channel.invoke(request).await?;
        Ok(response)
    }

    /// Run the requested tool, or synthesize the unsupported-tool
    /// observation. Never errors: every outcome folds back into the loop.
    async fn execute_tool(
        &self,
        parsed: &IterationState,
        tools: &HashMap<String, Box<dyn Tool>>,
        spec_map: &HashMap<String, ToolSpec>,
        question: &str,
    ) -> Observation {
        let call_id = parsed.tool_call_id.as_deref().unwrap_or("");
        let Some(action) = parsed.action.as_deref() else {
            return unsupported_tool_observation("unknown", call_id);
        };

        match (tools.get(action), spec_map.get(action)) {
            (Some(tool), Some(spec)) => {
                let tool_params =
                    build_tool_params(spec, question, parsed.action_input.as_deref());
                invoke_tool(
                    tool.as_ref(),
                    action,
                    call_id,
                    parsed.action_input.as_deref().unwrap_or(""),
                    tool_params,
                )
                .await
            }
            _ => {
                warn!(tool = action, "Model requested an unsupported tool");
                unsupported_tool_observation(action, call_id)
            }
        }
    }

    /// Fold a tool observation into the scratchpad, the trace, the
    /// accumulated additional info, and the multi-turn interactions.
    #[allow(clippy::too_many_arguments)]
    async fn fold_observation(
        &self,
        parsed: &IterationState,
        observation: &Observation,
        spec_map: &HashMap<String, ToolSpec>,
        params: &HashMap<String, String>,
        adapter: Option<&dyn FunctionCalling>,
        scratchpad: &mut Scratchpad,
        interactions: &mut Vec<String>,
        additional_info: &mut AdditionalInfo,
        trace_items: &mut Vec<OutputItem>,
        tracer: &TraceRecorder,
    ) {
        if let Some(spec) = spec_map.get(&observation.tool_name) {
            if spec.include_output_in_agent_response {
                additional_info.record(spec.tool_name(), &observation.content);
            }
        }

        let template = params
            .get(prompt::TOOL_RESPONSE_TEMPLATE)
            .cloned()
            .unwrap_or_else(|| templates::DEFAULT_TOOL_RESPONSE_TEMPLATE.to_string());
        let mut values = HashMap::new();
        values.insert(
            "llm_tool_selection_response".to_string(),
            parsed.thought_response.clone(),
        );
        values.insert("tool_name".to_string(), observation.tool_name.clone());
        values.insert(
            "tool_input".to_string(),
            parsed.action_input.clone().unwrap_or_default(),
        );
        values.insert("observation".to_string(), observation.content.clone());
        scratchpad.push(prompt::substitute(&template, &values));

        tracer
            .record(
                &observation.tool_name,
                parsed.action_input.as_deref().unwrap_or(""),
                &observation.content,
            )
            .await;
        trace_items.push(OutputItem::text(RESPONSE_FIELD, observation.content.clone()));

        match adapter {
            Some(adapter) => {
                interactions.extend(adapter.supply(std::slice::from_ref(observation)));
            }
            None => {
                let template = params
                    .get(prompt::INTERACTION_TEMPLATE_TOOL_RESPONSE)
                    .cloned()
                    .unwrap_or_else(|| {
                        templates::DEFAULT_INTERACTION_TOOL_RESPONSE.to_string()
                    });
                let mut values = HashMap::new();
                values.insert(
                    "tool_call_id".to_string(),
                    observation.tool_call_id.clone(),
                );
                values.insert(
                    "tool_response".to_string(),
                    prompt::json_escape(&observation.content),
                );
                interactions.push(prompt::substitute_prefixed(
                    &template,
                    prompt::INTERACTIONS_PREFIX,
                    &values,
                ));
            }
        }
    }

    /// The shared emit path for `Final` and `MaxIterationsReached`:
    /// persist the answer, then assemble the output items.
    async fn finish(
        &self,
        session: &AgentSession,
        question: &str,
        answer: &str,
        additional_info: &AdditionalInfo,
        trace_items: Vec<OutputItem>,
        tracer: &TraceRecorder,
    ) -> Result<AgentOutput> {
        if let Some(memory) = &self.memory {
            // Final-answer persistence is part of the contract: a failed
            // save fails the call even though an answer was computed.
            if self.config.trace_enabled {
                let record = InteractionRecord::new(question, answer)
                    .with_origin("LLM")
                    .with_trace_number(tracer.record_count() + 1)
                    .as_final_answer();
                memory
                    .append_interaction(
                        &session.session_id.0,
                        session.parent_interaction_id.as_deref(),
                        record,
                    )
                    .await
                    .map_err(Error::Memory)?;
            }
            if let Some(parent_id) = &session.parent_interaction_id {
                let mut update = InteractionUpdate::response(answer);
                if !additional_info.is_empty() {
                    update = update.with_additional_info(additional_info.to_value());
                }
                memory
                    .update_interaction(parent_id, update)
                    .await
                    .map_err(Error::Memory)?;
            }
        }

        let mut output = AgentOutput::new();
        output.push(OutputItem::text(SESSION_ID_FIELD, session.session_id.0.clone()));
        if let Some(parent_id) = &session.parent_interaction_id {
            output.push(OutputItem::text(PARENT_INTERACTION_ID_FIELD, parent_id.clone()));
        }

        if self.config.verbose {
            for item in trace_items {
                output.push(item);
            }
            output.push(OutputItem::text(RESPONSE_FIELD, answer.to_string()));
        } else {
            let mut payload = serde_json::Map::new();
            payload.insert(RESPONSE_FIELD.to_string(), serde_json::Value::String(answer.to_string()));
            payload.insert(ADDITIONAL_INFO_FIELD.to_string(), additional_info.to_value());
            output.push(OutputItem::structured(
                RESPONSE_FIELD,
                serde_json::Value::Object(payload),
            ));
        }
        Ok(output)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use windlass_core::agent::LlmSpec;
    use windlass_core::error::{MemoryError, ToolError};
    use windlass_core::memory::Interaction;
    use windlass_memory::InMemoryConversationStore;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn agent_with_tool(spec: ToolSpec) -> AgentDefinition {
        AgentDefinition::new("test-agent", LlmSpec::new("mock-model")).with_tool(spec)
    }

    fn search_spec() -> ToolSpec {
        ToolSpec::new("SearchTool").with_description("Searches the knowledge base")
    }

    fn runner_with(
        channel: Arc<SequentialMockChannel>,
        tool: &ScriptedTool,
    ) -> ReactRunner {
        let mut registry = ToolRegistry::new();
        registry.register("SearchTool", Box::new(ScriptedToolFactory::new(tool.clone())));
        ReactRunner::new(channel, Arc::new(registry))
    }

    #[tokio::test]
    async fn simple_final_answer() {
        let channel = Arc::new(SequentialMockChannel::new(vec![generic_final_response(
            "I know this",
            "The answer is 42.",
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel.clone(), &tool);

        let session = AgentSession::new("What is the answer?");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        assert_eq!(output.final_answer(), Some("The answer is 42."));
        assert_eq!(channel.request_count(), 1);
        assert_eq!(tool.call_count(), 0);
        assert_eq!(tool.close_count(), 1);
    }

    #[tokio::test]
    async fn tool_then_answer() {
        init_tracing();
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("Need to search", "SearchTool", "population of Seattle"),
            generic_final_response("Now I know", "About 750k."),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "42 results");
        let runner = runner_with(channel.clone(), &tool);

        let session = AgentSession::new("How many people live in Seattle?");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        assert_eq!(output.final_answer(), Some("About 750k."));
        assert_eq!(tool.call_count(), 1);
        assert_eq!(
            tool.last_params().unwrap().get("input").unwrap(),
            "population of Seattle"
        );

        // The scratchpad is the only part of the prompt that changes.
        let requests = channel.requests();
        let first_prompt = requests[0].prompt().unwrap().to_string();
        let second_prompt = requests[1].prompt().unwrap().to_string();
        assert!(!first_prompt.contains("Observation: 42 results"));
        assert!(second_prompt.contains("Observation: 42 results"));

        // Without an adapter, the interaction template still records the
        // tool result for multi-turn use.
        assert!(requests[1].parameters.get("_interactions").unwrap().contains("42 results"));
    }

    #[tokio::test]
    async fn tool_validation_failure_becomes_observation() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("Trying", "SearchTool", "bad input"),
            generic_final_response("Giving up", "No luck."),
        ]));
        let tool = ScriptedTool::rejecting("SearchTool");
        let runner = runner_with(channel.clone(), &tool);

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        assert_eq!(output.final_answer(), Some("No luck."));
        assert_eq!(tool.call_count(), 0);
        let second_prompt = channel.requests()[1].prompt().unwrap().to_string();
        assert!(second_prompt.contains("due to wrong input bad input"));
    }

    #[tokio::test]
    async fn tool_execution_failure_becomes_observation() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("Trying", "SearchTool", "query"),
            generic_final_response("Recovering", "Partial answer."),
        ]));
        let tool = ScriptedTool::failing("SearchTool", "connection refused");
        let runner = runner_with(channel.clone(), &tool);

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        assert_eq!(output.final_answer(), Some("Partial answer."));
        let second_prompt = channel.requests()[1].prompt().unwrap().to_string();
        assert!(second_prompt.contains("Failed to run the tool SearchTool"));
        assert!(second_prompt.contains("connection refused"));
    }

    #[tokio::test]
    async fn unsupported_tool_consumes_one_iteration() {
        // The native dialect surfaces whatever tool name the model
        // produced; the loop refuses it without failing the session.
        let channel = Arc::new(SequentialMockChannel::new(vec![
            openai_tool_response("Trying", "NoSuchTool", "{}", "tool_1"),
            openai_text_response("Done without the tool."),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel.clone(), &tool);

        let agent = AgentDefinition::new(
            "test-agent",
            LlmSpec::new("mock-model")
                .with_parameter("_llm_interface", "openai/v1/chat/completions"),
        )
        .with_tool(search_spec());

        let session = AgentSession::new("q");
        let output = runner.run(&agent, &session).await.unwrap();

        assert_eq!(output.final_answer(), Some("Done without the tool."));
        assert_eq!(tool.call_count(), 0);
        let second_prompt = channel.requests()[1].prompt().unwrap().to_string();
        assert!(second_prompt.contains("Failed to run the tool NoSuchTool which is unsupported."));
    }

    #[tokio::test]
    async fn native_dialect_tool_result_uses_adapter_shape() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            openai_tool_response("Searching", "SearchTool", "{\"query\":\"x\"}", "tool_1"),
            openai_text_response("All done."),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "3 documents");
        let runner = runner_with(channel.clone(), &tool);

        let agent = AgentDefinition::new(
            "test-agent",
            LlmSpec::new("mock-model")
                .with_parameter("_llm_interface", "openai/v1/chat/completions"),
        )
        .with_tool(search_spec());

        let session = AgentSession::new("q");
        let output = runner.run(&agent, &session).await.unwrap();
        assert_eq!(output.final_answer(), Some("All done."));

        let requests = channel.requests();
        // Tools were declared in the provider's native schema.
        assert!(requests[0].parameters.get("tool_configs").unwrap().contains("SearchTool"));
        // The tool result went back in the provider's message shape.
        let interactions = requests[1].parameters.get("_interactions").unwrap();
        assert!(interactions.contains("\"role\":\"tool\""));
        assert!(interactions.contains("tool_1"));
        assert!(interactions.contains("3 documents"));
    }

    #[tokio::test]
    async fn max_iterations_reached_without_running_tool() {
        let channel = Arc::new(SequentialMockChannel::new(vec![generic_action_response(
            "I should search",
            "SearchTool",
            "query",
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel.clone(), &tool).with_config(RunnerConfig {
            max_iterations: 1,
            ..RunnerConfig::default()
        });

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        let answer = output.final_answer().unwrap();
        assert!(answer.contains("maximum iterations (1)"));
        assert!(answer.contains("Last thought: I should search"));
        assert_eq!(channel.request_count(), 1);
        assert_eq!(tool.call_count(), 0);
        assert_eq!(tool.close_count(), 1);
    }

    #[tokio::test]
    async fn loop_never_exceeds_model_invocation_budget() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("t1", "SearchTool", "q1"),
            generic_action_response("t2", "SearchTool", "q2"),
            generic_action_response("t3", "SearchTool", "q3"),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "result");
        let runner = runner_with(channel.clone(), &tool).with_config(RunnerConfig {
            max_iterations: 3,
            ..RunnerConfig::default()
        });

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        assert_eq!(channel.request_count(), 3);
        assert_eq!(tool.call_count(), 2);
        assert!(output.final_answer().unwrap().contains("maximum iterations (3)"));
    }

    #[tokio::test]
    async fn model_failure_is_fatal() {
        let channel = Arc::new(SequentialMockChannel::with_results(vec![Err(
            windlass_core::error::ModelError::Network("connection reset".into()),
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel, &tool);

        let session = AgentSession::new("q");
        let err = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }

    #[tokio::test]
    async fn degraded_parse_still_answers() {
        let channel = Arc::new(SequentialMockChannel::new(vec![ModelResponse::from_text(
            "I cannot express this as JSON",
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel, &tool);

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();
        assert_eq!(output.final_answer(), Some("I cannot express this as JSON"));
    }

    #[tokio::test]
    async fn chat_history_preloaded_skipping_in_flight() {
        let store = Arc::new(InMemoryConversationStore::new());
        store
            .append_interaction("s1", None, InteractionRecord::new("old question", "old answer"))
            .await
            .unwrap();
        store
            .append_interaction("s1", None, InteractionRecord::new("pending question", ""))
            .await
            .unwrap();

        let channel = Arc::new(SequentialMockChannel::new(vec![generic_final_response(
            "t", "done",
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel.clone(), &tool).with_memory(store);

        let session =
            AgentSession::new("new question").with_session_id(windlass_core::SessionId::from("s1"));
        runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        let prompt_text = channel.requests()[0].prompt().unwrap().to_string();
        assert!(prompt_text.contains("Human: old question"));
        assert!(prompt_text.contains("AI: old answer"));
        assert!(!prompt_text.contains("pending question"));
    }

    #[tokio::test]
    async fn final_answer_persisted_with_additional_info() {
        let store = Arc::new(InMemoryConversationStore::new());
        let parent = store
            .append_interaction("s1", None, InteractionRecord::new("q", ""))
            .await
            .unwrap();

        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("searching", "SearchTool", "query"),
            generic_final_response("done thinking", "Final answer text."),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "42 results");
        let runner = runner_with(channel, &tool).with_memory(store.clone());

        let session = AgentSession::new("q")
            .with_session_id(windlass_core::SessionId::from("s1"))
            .with_parent_interaction(parent.clone());
        let output = runner
            .run(
                &agent_with_tool(search_spec().with_include_output(true)),
                &session,
            )
            .await
            .unwrap();

        // The parent interaction carries the answer and the accumulated
        // tool outputs.
        let updated = store.get(&parent).await.unwrap();
        assert_eq!(updated.response, "Final answer text.");
        let info = updated.additional_info.unwrap();
        assert_eq!(info["SearchTool.output"][0], "42 results");

        // Default mode output carries them too.
        let response_item = output
            .items
            .iter()
            .find(|i| i.name == RESPONSE_FIELD)
            .unwrap();
        let value = response_item.as_structured().unwrap();
        assert_eq!(value["response"], "Final answer text.");
        assert_eq!(value["additional_info"]["SearchTool.output"][0], "42 results");

        // Trace steps were persisted under the parent interaction.
        let traces = store.traces(&parent).await;
        assert!(traces.len() >= 2);
        assert_eq!(traces[0].origin.as_deref(), Some("LLM"));
        assert_eq!(traces[1].origin.as_deref(), Some("SearchTool"));
        assert_eq!(traces[1].response, "42 results");
    }

    struct UpdateFailsStore;

    #[async_trait]
    impl ConversationMemory for UpdateFailsStore {
        fn name(&self) -> &str {
            "update_fails"
        }
        async fn load_recent(
            &self,
            _session_id: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<Interaction>, MemoryError> {
            Ok(Vec::new())
        }
        async fn append_interaction(
            &self,
            _session_id: &str,
            _parent_id: Option<&str>,
            _record: InteractionRecord,
        ) -> std::result::Result<String, MemoryError> {
            Ok("id".into())
        }
        async fn update_interaction(
            &self,
            _interaction_id: &str,
            _update: InteractionUpdate,
        ) -> std::result::Result<(), MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }
    }

    #[tokio::test]
    async fn final_answer_save_failure_fails_the_call() {
        let channel = Arc::new(SequentialMockChannel::new(vec![generic_final_response(
            "t", "answer",
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel, &tool).with_memory(Arc::new(UpdateFailsStore));

        let session = AgentSession::new("q").with_parent_interaction("parent_1");
        let err = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Memory(_)));
    }

    #[tokio::test]
    async fn verbose_output_carries_the_trace() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("searching", "SearchTool", "query"),
            generic_final_response("done", "verbose answer"),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "found it");
        let runner = runner_with(channel, &tool).with_config(RunnerConfig {
            verbose: true,
            ..RunnerConfig::default()
        });

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        let responses: Vec<&str> = output
            .items
            .iter()
            .filter(|i| i.name == RESPONSE_FIELD)
            .filter_map(|i| i.as_text())
            .collect();
        // Decision, observation, final answer.
        assert_eq!(responses.len(), 3);
        assert!(responses[0].contains("searching"));
        assert_eq!(responses[1], "found it");
        assert_eq!(responses[2], "verbose answer");
        assert_eq!(output.final_answer(), Some("verbose answer"));
    }

    struct StaticCatalog {
        specs: Vec<ToolSpec>,
    }

    #[async_trait]
    impl ToolCatalog for StaticCatalog {
        async fn fetch_tools(
            &self,
            _agent: &AgentDefinition,
        ) -> std::result::Result<Vec<ToolSpec>, ToolError> {
            Ok(self.specs.clone())
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl ToolCatalog for BrokenCatalog {
        async fn fetch_tools(
            &self,
            _agent: &AgentDefinition,
        ) -> std::result::Result<Vec<ToolSpec>, ToolError> {
            Err(ToolError::CatalogUnavailable("remote catalog down".into()))
        }
    }

    #[tokio::test]
    async fn discovered_tools_are_usable() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("use the discovered one", "RemoteTool", "input"),
            generic_final_response("ok", "used it"),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "remote output");
        let runner = runner_with(channel, &tool).with_catalog(Arc::new(StaticCatalog {
            specs: vec![
                ToolSpec::new("SearchTool")
                    .with_name("RemoteTool")
                    .with_description("A remotely discovered tool"),
            ],
        }));

        // No static tools at all; only the catalog contributes.
        let agent = AgentDefinition::new("test-agent", LlmSpec::new("mock-model"));
        let session = AgentSession::new("q");
        let output = runner.run(&agent, &session).await.unwrap();

        assert_eq!(output.final_answer(), Some("used it"));
        assert_eq!(tool.call_count(), 1);
    }

    #[tokio::test]
    async fn runner_built_from_app_config() {
        let config: windlass_config::AppConfig = toml::from_str(
            r#"
[agent]
name = "configured"
max_iterations = 4
verbose = false

[llm]
model_id = "mock-model"

[[tools]]
type = "SearchTool"
description = "Searches the knowledge base"
"#,
        )
        .unwrap();
        config.validate().unwrap();

        let channel = Arc::new(SequentialMockChannel::new(vec![generic_final_response(
            "t",
            "configured answer",
        )]));
        let tool = ScriptedTool::succeeding("SearchTool", "unused");
        let runner = runner_with(channel, &tool)
            .with_config(RunnerConfig::from_settings(&config.agent));

        let agent = config.agent_definition();
        assert_eq!(agent.tools.len(), 1);

        let session = AgentSession::new("q");
        let output = runner.run(&agent, &session).await.unwrap();
        assert_eq!(output.final_answer(), Some("configured answer"));
    }

    #[tokio::test]
    async fn catalog_failure_degrades_to_static_tools() {
        let channel = Arc::new(SequentialMockChannel::new(vec![
            generic_action_response("searching", "SearchTool", "query"),
            generic_final_response("done", "static tools still work"),
        ]));
        let tool = ScriptedTool::succeeding("SearchTool", "output");
        let runner = runner_with(channel, &tool).with_catalog(Arc::new(BrokenCatalog));

        let session = AgentSession::new("q");
        let output = runner
            .run(&agent_with_tool(search_spec()), &session)
            .await
            .unwrap();

        assert_eq!(output.final_answer(), Some("static tools still work"));
        assert_eq!(tool.call_count(), 1);
    }
}
