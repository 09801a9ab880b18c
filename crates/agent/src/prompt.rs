//! Prompt assembly — placeholder substitution and section rendering.
//!
//! A prompt template is a plain string with `${parameters.<key>}`
//! placeholders. Assembly renders, in fixed order: prefix/suffix wrapping,
//! the tool catalogue, index hints, few-shot examples, chat history, and
//! free-form context. Each section independently supports configurable
//! prefix/suffix/per-item wrappers and defaults to an XML-like tag scheme.
//! A section with no data renders to an empty string in place; the
//! surrounding literal template text is preserved untouched.
//!
//! The scratchpad placeholder survives [`PromptAssembler::assemble`]: the
//! assembled *base prompt* is computed once, and
//! [`PromptAssembler::bind_scratchpad`] substitutes the growing scratchpad
//! into it before every model call. Re-binding an unchanged scratchpad is
//! byte-identical, which keeps iteration prompts reproducible.

use std::collections::HashMap;

use tracing::warn;
use windlass_core::error::PromptError;
use windlass_core::memory::Interaction;

// ── Parameter keys ────────────────────────────────────────────────────────

pub const PROMPT: &str = "prompt";
pub const QUESTION: &str = "question";
pub const SCRATCHPAD: &str = "scratchpad";
pub const CONTEXT: &str = "context";
pub const EXAMPLES: &str = "examples";
pub const INDEX_HINTS: &str = "index_hints";
pub const CHAT_HISTORY: &str = "chat_history";
pub const TOOL_DESCRIPTIONS: &str = "tool_descriptions";
pub const TOOL_NAMES: &str = "tool_names";
pub const TOOL_NAMES_SEPARATOR: &str = "tool_names.separator";
pub const PROMPT_PREFIX: &str = "prompt.prefix";
pub const PROMPT_SUFFIX: &str = "prompt.suffix";
pub const RESPONSE_FORMAT_INSTRUCTION: &str = "response_format_instruction";
pub const TOOL_RESPONSE_TEMPLATE: &str = "tool_response";
pub const CHAT_HISTORY_PREFIX_KEY: &str = "chat_history.prefix";
pub const CHAT_HISTORY_QUESTION_TEMPLATE: &str = "chat_history_template.user_question";
pub const CHAT_HISTORY_RESPONSE_TEMPLATE: &str = "chat_history_template.ai_response";
pub const INTERACTION_TEMPLATE_TOOL_RESPONSE: &str = "interaction_template.tool_response";
pub const INTERACTIONS: &str = "_interactions";
pub const LLM_INTERFACE: &str = "_llm_interface";
pub const LLM_GENERATED_INPUT: &str = "llm_generated_input";
pub const SYSTEM_PROMPT: &str = "system_prompt";
pub const STOP: &str = "stop";
pub const STOP_SEQUENCES: &str = "stop_sequences";

/// Placeholder opener for prompt parameters.
pub const PARAMETER_PREFIX: &str = "${parameters.";
/// Placeholder opener for chat-history message templates.
pub const CHAT_HISTORY_MESSAGE_PREFIX: &str = "${_chat_history.message.";
/// Placeholder opener for interaction templates.
pub const INTERACTIONS_PREFIX: &str = "${_interactions.";

// ── Default templates ─────────────────────────────────────────────────────

pub mod templates {
    /// The default prompt skeleton, used when the caller supplies none.
    pub const DEFAULT_PROMPT_TEMPLATE: &str = "${parameters.prompt.prefix}${parameters.response_format_instruction}\n\n${parameters.tool_descriptions}${parameters.index_hints}${parameters.examples}${parameters.chat_history}${parameters.context}${parameters.prompt.suffix}";

    pub const DEFAULT_PROMPT_PREFIX: &str = "Answer the question as best you can, reasoning step by step. You have access to the tools listed below; use a tool when it helps, and give a final answer once you know it.\n\n";

    pub const DEFAULT_FORMAT_INSTRUCTION: &str = "Respond with a single JSON object. To use a tool, reply {\"thought\": \"<your reasoning>\", \"action\": \"<tool name>\", \"action_input\": \"<tool input>\"}. When you know the answer, reply {\"thought\": \"<your reasoning>\", \"final_answer\": \"<the answer>\"}.";

    pub const DEFAULT_PROMPT_SUFFIX: &str =
        "Question: ${parameters.question}\n\n${parameters.scratchpad}";

    /// Paragraph appended to the scratchpad after every tool run.
    pub const DEFAULT_TOOL_RESPONSE_TEMPLATE: &str =
        "${parameters.llm_tool_selection_response}\nObservation: ${parameters.observation}";

    /// Interaction entry used for multi-turn tool results when no
    /// function-calling adapter is active.
    pub const DEFAULT_INTERACTION_TOOL_RESPONSE: &str = "{\"tool_call_id\":\"${_interactions.tool_call_id}\",\"tool_result\":\"${_interactions.tool_response}\"}";

    pub const DEFAULT_CHAT_HISTORY_PREFIX: &str =
        "Below is the chat history between Human and AI, oldest first:\n";

    pub const DEFAULT_TOOLS_PREFIX: &str =
        "You have access to the following tools defined in <tools>: \n<tools>\n";
    pub const DEFAULT_TOOLS_SUFFIX: &str = "</tools>\n";
    pub const DEFAULT_TOOL_PREFIX: &str = "<tool>\n";
    pub const DEFAULT_TOOL_SUFFIX: &str = "\n</tool>\n";

    pub const DEFAULT_INDEX_HINTS_PREFIX: &str =
        "You have access to the following index names defined in <indexes>: \n<indexes>\n";
    pub const DEFAULT_INDEX_HINTS_SUFFIX: &str = "</indexes>\n";
    pub const DEFAULT_INDEX_PREFIX: &str = "<index>\n";
    pub const DEFAULT_INDEX_SUFFIX: &str = "\n</index>\n";

    pub const DEFAULT_EXAMPLES_PREFIX: &str = "EXAMPLES\n--------\nYou should follow and learn from examples defined in <examples>: \n<examples>\n";
    pub const DEFAULT_EXAMPLES_SUFFIX: &str = "</examples>\n";
    pub const DEFAULT_EXAMPLE_PREFIX: &str = "<example>\n";
    pub const DEFAULT_EXAMPLE_SUFFIX: &str = "\n</example>\n";
}

// ── Substitution ──────────────────────────────────────────────────────────

/// Replace `${parameters.<key>}` placeholders with values from the map.
/// Keys absent from the map are left untouched.
pub fn substitute(template: &str, values: &HashMap<String, String>) -> String {
    substitute_prefixed(template, PARAMETER_PREFIX, values)
}

/// Replace `<prefix><key>}` placeholders with values from the map.
/// Substituted values are not re-scanned.
pub fn substitute_prefixed(
    template: &str,
    prefix: &str,
    values: &HashMap<String, String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(prefix) {
        out.push_str(&rest[..start]);
        let after = &rest[start + prefix.len()..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match values.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + prefix.len() + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder, keep the tail verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace every remaining `${parameters.*}` placeholder with an empty
/// string. An unresolved placeholder is a data gap, not an error.
pub fn blank_unresolved(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(PARAMETER_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + PARAMETER_PREFIX.len()..];
        match after.find('}') {
            Some(end) => rest = &after[end + 1..],
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escape text for embedding inside a JSON string value.
pub fn json_escape(text: &str) -> String {
    let quoted = serde_json::Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

// ── Section renderers ─────────────────────────────────────────────────────

fn wrapper(params: &HashMap<String, String>, key: &str, default: &str) -> String {
    params.get(key).cloned().unwrap_or_else(|| default.to_string())
}

fn parse_string_list(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    let Some(raw) = params.get(key) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(items) => items,
        Err(e) => {
            warn!(key, error = %e, "Ignoring malformed list parameter");
            Vec::new()
        }
    }
}

fn substitute_one(prompt: &str, key: &str, value: String) -> String {
    let mut map = HashMap::new();
    map.insert(key.to_string(), value);
    substitute(prompt, &map)
}

/// Resolve the `prompt.prefix` and `prompt.suffix` placeholders. Missing
/// values render to empty strings.
pub fn add_prefix_suffix_to_prompt(params: &HashMap<String, String>, prompt: &str) -> String {
    let mut map = HashMap::new();
    map.insert(
        PROMPT_PREFIX.to_string(),
        params.get(PROMPT_PREFIX).cloned().unwrap_or_default(),
    );
    map.insert(
        PROMPT_SUFFIX.to_string(),
        params.get(PROMPT_SUFFIX).cloned().unwrap_or_default(),
    );
    substitute(prompt, &map)
}

/// Render the tool catalogue into `tool_descriptions` and `tool_names`.
///
/// Every requested tool must be registered with a description; an unknown
/// name fails the whole assembly with [`PromptError::ToolNotRegistered`].
pub fn add_tools_to_prompt(
    registered: &HashMap<String, String>,
    params: &HashMap<String, String>,
    tool_names: &[String],
    prompt: &str,
) -> Result<String, PromptError> {
    let mut descriptions = String::new();
    if !tool_names.is_empty() {
        descriptions.push_str(&wrapper(params, "tools.prefix", templates::DEFAULT_TOOLS_PREFIX));
        for name in tool_names {
            let description = registered
                .get(name)
                .ok_or_else(|| PromptError::ToolNotRegistered(name.clone()))?;
            descriptions.push_str(&wrapper(
                params,
                "tools.tool.prefix",
                templates::DEFAULT_TOOL_PREFIX,
            ));
            descriptions.push_str(name);
            descriptions.push_str(": ");
            descriptions.push_str(description);
            descriptions.push_str(&wrapper(
                params,
                "tools.tool.suffix",
                templates::DEFAULT_TOOL_SUFFIX,
            ));
        }
        descriptions.push_str(&wrapper(params, "tools.suffix", templates::DEFAULT_TOOLS_SUFFIX));
    }

    let separator = wrapper(params, TOOL_NAMES_SEPARATOR, ", ");
    let names = if tool_names.is_empty() {
        String::new()
    } else {
        format!("{},", tool_names.join(&separator))
    };

    let mut map = HashMap::new();
    map.insert(TOOL_DESCRIPTIONS.to_string(), descriptions);
    map.insert(TOOL_NAMES.to_string(), names);
    Ok(substitute(prompt, &map))
}

/// Render the index-hints section from a JSON list parameter.
pub fn add_index_hints_to_prompt(params: &HashMap<String, String>, prompt: &str) -> String {
    let indexes = parse_string_list(params, INDEX_HINTS);
    let rendered = if indexes.is_empty() {
        String::new()
    } else {
        let mut out = wrapper(params, "index_hints.prefix", templates::DEFAULT_INDEX_HINTS_PREFIX);
        for index in &indexes {
            out.push_str(&wrapper(
                params,
                "index_hints.index.prefix",
                templates::DEFAULT_INDEX_PREFIX,
            ));
            out.push_str(index);
            out.push_str(&wrapper(
                params,
                "index_hints.index.suffix",
                templates::DEFAULT_INDEX_SUFFIX,
            ));
        }
        out.push_str(&wrapper(
            params,
            "index_hints.suffix",
            templates::DEFAULT_INDEX_HINTS_SUFFIX,
        ));
        out
    };
    substitute_one(prompt, INDEX_HINTS, rendered)
}

/// Render the few-shot examples section from a JSON list parameter.
pub fn add_examples_to_prompt(params: &HashMap<String, String>, prompt: &str) -> String {
    let examples = parse_string_list(params, EXAMPLES);
    let rendered = if examples.is_empty() {
        String::new()
    } else {
        let mut out = wrapper(params, "examples.prefix", templates::DEFAULT_EXAMPLES_PREFIX);
        for example in &examples {
            out.push_str(&wrapper(
                params,
                "examples.example.prefix",
                templates::DEFAULT_EXAMPLE_PREFIX,
            ));
            out.push_str(example);
            out.push_str(&wrapper(
                params,
                "examples.example.suffix",
                templates::DEFAULT_EXAMPLE_SUFFIX,
            ));
        }
        out.push_str(&wrapper(params, "examples.suffix", templates::DEFAULT_EXAMPLES_SUFFIX));
        out
    };
    substitute_one(prompt, EXAMPLES, rendered)
}

/// Resolve the chat-history placeholder.
pub fn add_chat_history_to_prompt(params: &HashMap<String, String>, prompt: &str) -> String {
    substitute_one(
        prompt,
        CHAT_HISTORY,
        params.get(CHAT_HISTORY).cloned().unwrap_or_default(),
    )
}

/// Resolve the free-form context placeholder.
pub fn add_context_to_prompt(params: &HashMap<String, String>, prompt: &str) -> String {
    substitute_one(
        prompt,
        CONTEXT,
        params.get(CONTEXT).cloned().unwrap_or_default(),
    )
}

// ── Chat history ──────────────────────────────────────────────────────────

/// Render loaded interactions into the `chat_history` parameter value.
///
/// Interactions with empty responses are skipped: the store records the
/// question with an empty response first and fills the answer in later, so
/// an empty response marks an in-flight parallel run. Returns `None` when
/// nothing usable remains.
pub fn render_chat_history(
    interactions: &[Interaction],
    params: &HashMap<String, String>,
) -> Option<String> {
    let usable: Vec<&Interaction> = interactions
        .iter()
        .filter(|i| !i.response.is_empty())
        .collect();
    if usable.is_empty() {
        return None;
    }

    let question_template = params.get(CHAT_HISTORY_QUESTION_TEMPLATE);
    let response_template = params.get(CHAT_HISTORY_RESPONSE_TEMPLATE);

    if let (Some(question_template), Some(response_template)) =
        (question_template, response_template)
    {
        // Message-template mode: each side rendered separately, joined as
        // a message list fragment.
        let mut rendered = Vec::new();
        for interaction in usable {
            let mut map = HashMap::new();
            map.insert("question".to_string(), json_escape(&interaction.question));
            rendered.push(substitute_prefixed(
                question_template,
                CHAT_HISTORY_MESSAGE_PREFIX,
                &map,
            ));

            map.clear();
            map.insert("response".to_string(), json_escape(&interaction.response));
            rendered.push(substitute_prefixed(
                response_template,
                CHAT_HISTORY_MESSAGE_PREFIX,
                &map,
            ));
        }
        Some(format!("{}, ", rendered.join(", ")))
    } else {
        let mut out = params
            .get(CHAT_HISTORY_PREFIX_KEY)
            .cloned()
            .unwrap_or_else(|| templates::DEFAULT_CHAT_HISTORY_PREFIX.to_string());
        for interaction in usable {
            out.push_str(&format!(
                "Human: {}\nAI: {}\n",
                interaction.question, interaction.response
            ));
        }
        Some(out)
    }
}

// ── LLM parameter defaults ────────────────────────────────────────────────

/// Fill in template and stop-sequence defaults the loop relies on.
pub fn apply_template_defaults(params: &mut HashMap<String, String>) {
    if !params.contains_key(STOP) {
        params.insert(
            STOP.to_string(),
            serde_json::json!(["\nObservation:", "\n\tObservation:"]).to_string(),
        );
    }
    if !params.contains_key(STOP_SEQUENCES) {
        params.insert(
            STOP_SEQUENCES.to_string(),
            serde_json::json!([
                "\n\nHuman:",
                "\nObservation:",
                "\n\tObservation:",
                "\nObservation",
                "\n\tObservation",
                "\n\nQuestion"
            ])
            .to_string(),
        );
    }
    params
        .entry(PROMPT_PREFIX.to_string())
        .or_insert_with(|| templates::DEFAULT_PROMPT_PREFIX.to_string());
    params
        .entry(PROMPT_SUFFIX.to_string())
        .or_insert_with(|| templates::DEFAULT_PROMPT_SUFFIX.to_string());
    params
        .entry(RESPONSE_FORMAT_INSTRUCTION.to_string())
        .or_insert_with(|| templates::DEFAULT_FORMAT_INSTRUCTION.to_string());
    params
        .entry(TOOL_RESPONSE_TEMPLATE.to_string())
        .or_insert_with(|| templates::DEFAULT_TOOL_RESPONSE_TEMPLATE.to_string());
}

/// Append the current date and time to the system prompt, or to the prompt
/// prefix when no system prompt is configured.
pub fn inject_datetime(params: &mut HashMap<String, String>, format: Option<&str>) {
    let now = chrono::Utc::now();
    let formatted = match format {
        Some(f) => now.format(f).to_string(),
        None => now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    };
    let line = format!("Current date and time: {formatted}");

    if let Some(system_prompt) = params.get(SYSTEM_PROMPT) {
        let updated = format!("{system_prompt}\n\n{line}");
        params.insert(SYSTEM_PROMPT.to_string(), updated);
    } else {
        let prefix = params
            .get(PROMPT_PREFIX)
            .cloned()
            .unwrap_or_else(|| templates::DEFAULT_PROMPT_PREFIX.to_string());
        params.insert(PROMPT_PREFIX.to_string(), format!("{prefix}\n\n{line}"));
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The prompt assembler. Stateless apart from its template — create one
/// per run and reuse it across iterations.
pub struct PromptAssembler {
    template: String,
}

impl PromptAssembler {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Use the caller's `prompt` parameter, falling back to the default
    /// skeleton.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        Self::new(
            params
                .get(PROMPT)
                .cloned()
                .unwrap_or_else(|| templates::DEFAULT_PROMPT_TEMPLATE.to_string()),
        )
    }

    /// Assemble the base prompt: every section rendered, every general
    /// parameter resolved, only the scratchpad placeholder left standing.
    pub fn assemble(
        &self,
        params: &HashMap<String, String>,
        registered_tools: &HashMap<String, String>,
        tool_names: &[String],
    ) -> Result<String, PromptError> {
        let mut prompt = add_prefix_suffix_to_prompt(params, &self.template);
        prompt = add_tools_to_prompt(registered_tools, params, tool_names, &prompt)?;
        prompt = add_index_hints_to_prompt(params, &prompt);
        prompt = add_examples_to_prompt(params, &prompt);
        prompt = add_chat_history_to_prompt(params, &prompt);
        prompt = add_context_to_prompt(params, &prompt);

        // General parameters last: prefix/suffix values may themselves
        // carry placeholders (question, format instruction). The
        // scratchpad stays unresolved; it is bound per iteration.
        let mut general = params.clone();
        general.remove(SCRATCHPAD);
        Ok(substitute(&prompt, &general))
    }

    /// Bind the scratchpad into a base prompt and blank any placeholder
    /// still unresolved. Idempotent for an unchanged scratchpad.
    pub fn bind_scratchpad(base_prompt: &str, scratchpad: &str) -> String {
        let mut map = HashMap::new();
        map.insert(SCRATCHPAD.to_string(), scratchpad.to_string());
        blank_unresolved(&substitute(base_prompt, &map))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn interaction(question: &str, response: &str) -> Interaction {
        Interaction {
            id: "i".into(),
            session_id: "s".into(),
            parent_id: None,
            origin: None,
            question: question.into(),
            response: response.into(),
            trace_number: None,
            final_answer: true,
            additional_info: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn substitute_replaces_known_keys() {
        let result = substitute(
            "Q: ${parameters.question}",
            &params(&[("question", "hello")]),
        );
        assert_eq!(result, "Q: hello");
    }

    #[test]
    fn substitute_leaves_unknown_keys() {
        let result = substitute("Q: ${parameters.question}", &params(&[]));
        assert_eq!(result, "Q: ${parameters.question}");
    }

    #[test]
    fn blank_unresolved_renders_empty_string() {
        // Literal text around the placeholder survives.
        assert_eq!(blank_unresolved("Q: ${parameters.context}"), "Q: ");
        assert_eq!(
            blank_unresolved("a ${parameters.x} b ${parameters.y} c"),
            "a  b  c"
        );
    }

    #[test]
    fn unterminated_placeholder_kept_verbatim() {
        assert_eq!(
            substitute("oops ${parameters.question", &params(&[("question", "x")])),
            "oops ${parameters.question"
        );
    }

    #[test]
    fn add_context_with_and_without_value() {
        let prompt = "initial prompt ${parameters.context}";
        let with = add_context_to_prompt(&params(&[("context", "Contextual information here.")]), prompt);
        assert_eq!(with, "initial prompt Contextual information here.");

        let without = add_context_to_prompt(&params(&[]), prompt);
        assert_eq!(without, "initial prompt ");
    }

    #[test]
    fn add_chat_history_with_and_without_value() {
        let prompt = "initial prompt ${parameters.chat_history}";
        let with = add_chat_history_to_prompt(
            &params(&[("chat_history", "Previous chat history here.")]),
            prompt,
        );
        assert_eq!(with, "initial prompt Previous chat history here.");

        let without = add_chat_history_to_prompt(&params(&[]), prompt);
        assert_eq!(without, "initial prompt ");
    }

    #[test]
    fn add_prefix_suffix_defaults_to_empty() {
        let prompt = "initial prompt ${parameters.prompt.prefix} main content ${parameters.prompt.suffix}";
        let with = add_prefix_suffix_to_prompt(
            &params(&[("prompt.prefix", "Prefix: "), ("prompt.suffix", " :Suffix")]),
            prompt,
        );
        assert_eq!(with, "initial prompt Prefix:  main content  :Suffix");

        let without = add_prefix_suffix_to_prompt(&params(&[]), prompt);
        assert_eq!(without, "initial prompt  main content ");
    }

    #[test]
    fn tools_section_default_wrappers() {
        let mut registered = HashMap::new();
        registered.insert("Tool1".to_string(), "Description of Tool1".to_string());
        registered.insert("Tool2".to_string(), "Description of Tool2".to_string());
        let names = vec!["Tool1".to_string(), "Tool2".to_string()];

        let prompt = "initial prompt ${parameters.tool_descriptions} and ${parameters.tool_names}";
        let result = add_tools_to_prompt(&registered, &params(&[]), &names, prompt).unwrap();

        let expected = "initial prompt You have access to the following tools defined in <tools>: \n\
             <tools>\n<tool>\nTool1: Description of Tool1\n</tool>\n\
             <tool>\nTool2: Description of Tool2\n</tool>\n</tools>\n and Tool1, Tool2,";
        assert_eq!(result, expected);
    }

    #[test]
    fn tools_section_unregistered_tool_fails() {
        let mut registered = HashMap::new();
        registered.insert("Tool1".to_string(), "Description of Tool1".to_string());
        let names = vec!["Tool1".to_string(), "UnregisteredTool".to_string()];

        let err = add_tools_to_prompt(
            &registered,
            &params(&[]),
            &names,
            "initial prompt ${parameters.tool_descriptions}",
        )
        .unwrap_err();
        assert!(err.to_string().contains("UnregisteredTool"));
    }

    #[test]
    fn index_hints_default_wrappers() {
        let prompt = "initial prompt ${parameters.index_hints}";
        let result = add_index_hints_to_prompt(
            &params(&[("index_hints", "[\"index1\", \"index2\"]")]),
            prompt,
        );
        let expected = "initial prompt You have access to the following index names defined in <indexes>: \n\
             <indexes>\n<index>\nindex1\n</index>\n<index>\nindex2\n</index>\n</indexes>\n";
        assert_eq!(result, expected);
    }

    #[test]
    fn index_hints_custom_wrappers() {
        let prompt = "initial prompt ${parameters.index_hints}";
        let result = add_index_hints_to_prompt(
            &params(&[
                ("index_hints", "[\"index1\", \"index2\"]"),
                ("index_hints.prefix", "Custom Prefix\n"),
                ("index_hints.suffix", "\nCustom Suffix"),
                ("index_hints.index.prefix", "Index: "),
                ("index_hints.index.suffix", "; "),
            ]),
            prompt,
        );
        assert_eq!(
            result,
            "initial prompt Custom Prefix\nIndex: index1; Index: index2; \nCustom Suffix"
        );
    }

    #[test]
    fn index_hints_absent_renders_empty() {
        let result = add_index_hints_to_prompt(&params(&[]), "initial prompt ${parameters.index_hints}");
        assert_eq!(result, "initial prompt ");
    }

    #[test]
    fn examples_default_wrappers() {
        let prompt = "initial prompt ${parameters.examples}";
        let result = add_examples_to_prompt(
            &params(&[("examples", "[\"Example 1\", \"Example 2\"]")]),
            prompt,
        );
        let expected = "initial prompt EXAMPLES\n--------\n\
             You should follow and learn from examples defined in <examples>: \n\
             <examples>\n<example>\nExample 1\n</example>\n<example>\nExample 2\n</example>\n</examples>\n";
        assert_eq!(result, expected);
    }

    #[test]
    fn malformed_list_parameter_renders_empty() {
        let result = add_examples_to_prompt(
            &params(&[("examples", "not a json list")]),
            "x ${parameters.examples}y",
        );
        assert_eq!(result, "x y");
    }

    #[test]
    fn assemble_resolves_everything_but_scratchpad() {
        let assembler = PromptAssembler::new(
            "${parameters.prompt.prefix}Q: ${parameters.question}\n${parameters.context}${parameters.scratchpad}",
        );
        let base = assembler
            .assemble(
                &params(&[("question", "What?"), ("prompt.prefix", "Intro. ")]),
                &HashMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(base, "Intro. Q: What?\n${parameters.scratchpad}");

        let rendered = PromptAssembler::bind_scratchpad(&base, "Observation: 42");
        assert_eq!(rendered, "Intro. Q: What?\nObservation: 42");
    }

    #[test]
    fn bind_scratchpad_is_idempotent() {
        let base = "Q: hi\n${parameters.scratchpad}\n${parameters.unset}";
        let first = PromptAssembler::bind_scratchpad(base, "note");
        let second = PromptAssembler::bind_scratchpad(base, "note");
        assert_eq!(first, second);
        assert_eq!(first, "Q: hi\nnote\n");
    }

    #[test]
    fn default_template_renders_without_sections() {
        let assembler = PromptAssembler::from_params(&HashMap::new());
        let mut p = params(&[("question", "What is 2+2?")]);
        apply_template_defaults(&mut p);
        let base = assembler.assemble(&p, &HashMap::new(), &[]).unwrap();
        let rendered = PromptAssembler::bind_scratchpad(&base, "");

        assert!(rendered.contains("Question: What is 2+2?"));
        assert!(rendered.contains("final_answer"));
        assert!(!rendered.contains("${parameters."));
    }

    #[test]
    fn prefix_value_placeholders_are_resolved() {
        let assembler =
            PromptAssembler::new("${parameters.prompt.prefix}${parameters.scratchpad}");
        let base = assembler
            .assemble(
                &params(&[
                    ("prompt.prefix", "Rules: ${parameters.response_format_instruction}\n"),
                    ("response_format_instruction", "reply in JSON"),
                ]),
                &HashMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(base, "Rules: reply in JSON\n${parameters.scratchpad}");
    }

    #[test]
    fn chat_history_skips_in_flight_interactions() {
        let interactions = vec![
            interaction("q1", "r1"),
            interaction("q2", ""),
            interaction("q3", "r3"),
        ];
        let rendered = render_chat_history(&interactions, &params(&[])).unwrap();
        assert!(rendered.contains("Human: q1"));
        assert!(!rendered.contains("q2"));
        assert!(rendered.contains("AI: r3"));
    }

    #[test]
    fn chat_history_all_in_flight_renders_nothing() {
        let interactions = vec![interaction("q1", "")];
        assert!(render_chat_history(&interactions, &params(&[])).is_none());
    }

    #[test]
    fn chat_history_message_templates() {
        let interactions = vec![interaction("hi \"there\"", "hello")];
        let rendered = render_chat_history(
            &interactions,
            &params(&[
                (
                    "chat_history_template.user_question",
                    "{\"role\":\"user\",\"content\":\"${_chat_history.message.question}\"}",
                ),
                (
                    "chat_history_template.ai_response",
                    "{\"role\":\"assistant\",\"content\":\"${_chat_history.message.response}\"}",
                ),
            ]),
        )
        .unwrap();

        assert_eq!(
            rendered,
            "{\"role\":\"user\",\"content\":\"hi \\\"there\\\"\"}, {\"role\":\"assistant\",\"content\":\"hello\"}, "
        );
    }

    #[test]
    fn template_defaults_fill_stop_sequences() {
        let mut p = HashMap::new();
        apply_template_defaults(&mut p);
        assert!(p.get(STOP).unwrap().contains("Observation:"));
        assert!(p.get(STOP_SEQUENCES).unwrap().contains("Human:"));
        assert!(p.contains_key(PROMPT_PREFIX));
        assert!(p.contains_key(TOOL_RESPONSE_TEMPLATE));

        // Caller-supplied values win.
        let mut custom = params(&[("stop", "[\"END\"]")]);
        apply_template_defaults(&mut custom);
        assert_eq!(custom.get(STOP).unwrap(), "[\"END\"]");
    }

    #[test]
    fn datetime_injection_targets_system_prompt_first() {
        let mut p = params(&[("system_prompt", "You are helpful.")]);
        inject_datetime(&mut p, None);
        assert!(p.get(SYSTEM_PROMPT).unwrap().starts_with("You are helpful."));
        assert!(p.get(SYSTEM_PROMPT).unwrap().contains("Current date and time:"));

        let mut without = HashMap::new();
        inject_datetime(&mut without, Some("%Y"));
        assert!(without.get(PROMPT_PREFIX).unwrap().contains("Current date and time:"));
    }
}
