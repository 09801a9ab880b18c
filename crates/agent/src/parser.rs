//! Output parsing — classify a raw model response into an [`IterationState`].
//!
//! Providers disagree about where a reply lives inside the response body
//! and how tool calls are encoded. Parsing is modeled as a tagged dialect:
//!
//! - [`ResponseDialect::Native`] reads a provider-native tool-call schema
//!   through a configured [`PathConfig`] (chat-completions, Converse, or a
//!   text-embedded variant where the payload is JSON inside the free text).
//! - [`ResponseDialect::Generic`] is the default/fallback: the free text is
//!   scanned for an embedded `{"thought", "action", "action_input",
//!   "final_answer"}` object, unwrapping markdown fences.
//!
//! Parsing is lenient by design. A hallucinated tool name, malformed JSON,
//! or an unrecognized structured reply all degrade to a final answer
//! rather than failing the session; the `parse_degraded` flag marks those
//! echo fallbacks so callers can tell them from a genuine final answer.
//! Identical input always yields an identical `IterationState`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use windlass_core::model::ModelResponse;

/// Path prefix marking a location inside the JSON-parsed free text rather
/// than the response body itself.
const EMBEDDED_PREFIX: &str = "_llm_response.";

// ── Iteration state ───────────────────────────────────────────────────────

/// The per-turn decision extracted from a model response.
///
/// Exactly one of `action` / `final_answer` is meaningful per completed
/// turn. `thought` is always present, possibly empty. `thought_response`
/// carries the raw decision text for scratchpad and trace purposes.
/// `parse_degraded` is set when the answer is an echo fallback (plain
/// prose, hallucinated tool name, unrecognized structured reply) rather
/// than a declared final answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    pub thought_response: String,
    #[serde(default)]
    pub parse_degraded: bool,
}

impl IterationState {
    pub fn is_final(&self) -> bool {
        self.final_answer.is_some()
    }

    pub fn wants_tool(&self) -> bool {
        self.final_answer.is_none() && self.action.is_some()
    }
}

// ── Dialects ──────────────────────────────────────────────────────────────

/// Where to find text, tool calls, and the finish reason inside a
/// provider-native response. Paths use a small JSON-path subset:
/// `$.a.b`, `[0]`, and the collecting wildcard `[*]`. Record-relative
/// paths (`tool_name_path` etc.) are resolved inside each tool-call
/// record. A path starting with `_llm_response.` resolves inside the
/// JSON-parsed free text instead of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    pub response_filter: String,
    pub tool_calls_path: String,
    pub tool_name_path: String,
    pub tool_input_path: String,
    pub tool_call_id_path: String,
    pub finish_reason_path: String,
    pub finish_reason_tool_use: String,
}

impl PathConfig {
    /// The chat-completions shape: `choices[0].message` with a
    /// `tool_calls` list of `{function: {name, arguments}, id}` records.
    pub fn openai() -> Self {
        Self {
            response_filter: "$.choices[0].message.content".into(),
            tool_calls_path: "$.choices[0].message.tool_calls".into(),
            tool_name_path: "function.name".into(),
            tool_input_path: "function.arguments".into(),
            tool_call_id_path: "id".into(),
            finish_reason_path: "$.choices[0].finish_reason".into(),
            finish_reason_tool_use: "tool_calls".into(),
        }
    }

    /// The Converse shape: `output.message.content` blocks carrying
    /// `toolUse: {name, input, toolUseId}` records.
    pub fn converse() -> Self {
        Self {
            response_filter: "$.output.message.content[0].text".into(),
            tool_calls_path: "$.output.message.content[*].toolUse".into(),
            tool_name_path: "name".into(),
            tool_input_path: "input".into(),
            tool_call_id_path: "toolUseId".into(),
            finish_reason_path: "$.stopReason".into(),
            finish_reason_tool_use: "tool_use".into(),
        }
    }

    /// Tool calls in-lined as JSON inside the free text, for models
    /// without a native tool-call channel.
    pub fn text_embedded() -> Self {
        Self {
            response_filter: "$.output.message.content[0].text".into(),
            tool_calls_path: "_llm_response.tool_calls".into(),
            tool_name_path: "tool_name".into(),
            tool_input_path: "input".into(),
            tool_call_id_path: "id".into(),
            finish_reason_path: "_llm_response.stop_reason".into(),
            finish_reason_tool_use: "tool_use".into(),
        }
    }
}

/// The provider dialect a response is parsed under.
#[derive(Debug, Clone, Default)]
pub enum ResponseDialect {
    /// Provider-native tool-call schema located via the path config.
    Native(PathConfig),
    /// JSON-in-text; the default and the fallback for native responses
    /// without a tool call.
    #[default]
    Generic,
}

// ── Path resolution ───────────────────────────────────────────────────────

#[derive(Debug)]
enum Segment {
    Key(String),
    Index(usize),
    Wild,
}

fn parse_path(path: &str) -> Vec<Segment> {
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let mut rest = part;
        if let Some(bracket) = rest.find('[') {
            let key = &rest[..bracket];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &rest[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(end) = stripped.find(']') else {
                    break;
                };
                let selector = &stripped[..end];
                if selector == "*" {
                    segments.push(Segment::Wild);
                } else if let Ok(index) = selector.parse::<usize>() {
                    segments.push(Segment::Index(index));
                }
                rest = &stripped[end + 1..];
            }
        } else {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    segments
}

fn resolve_segments(value: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match first {
        Segment::Key(key) => value
            .as_object()?
            .get(key)
            .and_then(|v| resolve_segments(v, rest)),
        Segment::Index(index) => value
            .as_array()?
            .get(*index)
            .and_then(|v| resolve_segments(v, rest)),
        Segment::Wild => {
            let collected: Vec<Value> = value
                .as_array()?
                .iter()
                .filter_map(|v| resolve_segments(v, rest))
                .collect();
            Some(Value::Array(collected))
        }
    }
}

/// Resolve a path inside a JSON value.
pub(crate) fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    resolve_segments(value, &parse_path(path))
}

fn resolve_string(value: &Value, path: &str) -> Option<String> {
    resolve_path(value, path).and_then(|v| v.as_str().map(str::to_string))
}

// ── Native dialect ────────────────────────────────────────────────────────

fn value_to_input_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_configured(body: &Value, embedded: Option<&Value>, path: &str) -> Option<Value> {
    match path.strip_prefix(EMBEDDED_PREFIX) {
        Some(rest) => embedded.and_then(|e| resolve_path(e, rest)),
        None => resolve_path(body, path),
    }
}

fn parse_native(body: &Value, config: &PathConfig) -> Option<IterationState> {
    let uses_embedded = config.tool_calls_path.starts_with(EMBEDDED_PREFIX)
        || config.finish_reason_path.starts_with(EMBEDDED_PREFIX);
    let embedded = if uses_embedded {
        let text = resolve_string(body, &config.response_filter)?;
        serde_json::from_str::<Value>(&text).ok()?
    } else {
        Value::Null
    };
    let embedded_ref = if uses_embedded { Some(&embedded) } else { None };

    let finish = resolve_configured(body, embedded_ref, &config.finish_reason_path)?;
    if finish.as_str()? != config.finish_reason_tool_use {
        return None;
    }

    let calls = resolve_configured(body, embedded_ref, &config.tool_calls_path)?;
    let records: Vec<Value> = match calls {
        Value::Array(items) => items,
        record @ Value::Object(_) => vec![record],
        _ => return None,
    };
    let record = records.into_iter().next()?;

    let action = resolve_path(&record, &config.tool_name_path)?
        .as_str()?
        .to_string();
    let action_input = value_to_input_string(&resolve_path(&record, &config.tool_input_path)?);
    let tool_call_id = resolve_path(&record, &config.tool_call_id_path)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    // For the text-embedded variant the free text *is* the payload, so
    // there is no separate thought.
    let thought = if uses_embedded {
        String::new()
    } else {
        resolve_string(body, &config.response_filter).unwrap_or_default()
    };

    Some(IterationState {
        thought,
        action: Some(action),
        action_input: Some(action_input),
        tool_call_id: Some(tool_call_id),
        final_answer: None,
        thought_response: record.to_string(),
        parse_degraded: false,
    })
}

// ── Generic dialect ───────────────────────────────────────────────────────

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid regex"));
static THOUGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""thought"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""action"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});
static ACTION_INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""action_input"\s*:\s*"((?s:.)*?)"\s*(?:[,}\n]|$)"#).expect("valid regex")
});
static FINAL_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""final_answer"\s*:\s*"((?s:.)*)""#).expect("valid regex")
});

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the first balanced `{...}` block, ignoring braces inside
/// string literals.
fn balanced_block(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Candidate JSON blocks, most specific first: the fenced block if any,
/// then the first balanced block of the whole text.
fn json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(captures) = FENCED_JSON_RE.captures(text) {
        if let Some(inner) = captures.get(1) {
            if let Some(block) = balanced_block(inner.as_str()) {
                candidates.push(block);
            }
        }
    }
    if let Some(block) = balanced_block(text) {
        if !candidates.contains(&block) {
            candidates.push(block);
        }
    }
    candidates
}

/// Match a declared action against the registered tool names. An exact
/// match wins; otherwise the declared text is scanned for a tool name as
/// a case-insensitive substring, tolerating replies like
/// "Let me run SearchTool to get more data".
fn match_tool(declared: &str, tools: &BTreeSet<String>) -> Option<String> {
    for tool in tools {
        if tool == declared {
            return Some(tool.clone());
        }
    }
    let lowered = declared.to_lowercase();
    for tool in tools {
        if lowered.contains(&tool.to_lowercase()) {
            return Some(tool.clone());
        }
    }
    None
}

fn value_to_field_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn classify_object(
    map: &serde_json::Map<String, Value>,
    raw: Option<&str>,
    tools: &BTreeSet<String>,
) -> IterationState {
    let thought = map.get("thought").map(value_to_field_string);
    let declared_action = map.get("action").map(value_to_field_string);
    let action_input = map.get("action_input").map(value_to_field_string);
    let final_answer = map.get("final_answer").map(value_to_field_string);
    // Text-extracted objects echo the original text; structured maps are
    // re-serialized.
    let serialized = raw
        .map(str::to_string)
        .unwrap_or_else(|| Value::Object(map.clone()).to_string());

    if let Some(declared) = declared_action {
        if let Some(tool) = match_tool(&declared, tools) {
            return IterationState {
                thought: thought.unwrap_or_default(),
                action: Some(tool),
                action_input,
                tool_call_id: None,
                final_answer: None,
                thought_response: serialized,
                parse_degraded: false,
            };
        }
        // Hallucinated tool name: echo the whole reply as a final answer
        // instead of failing the session.
        return IterationState {
            thought: thought.unwrap_or_default(),
            action: None,
            action_input: None,
            tool_call_id: None,
            final_answer: Some(serialized.clone()),
            thought_response: serialized,
            parse_degraded: true,
        };
    }

    if let Some(answer) = final_answer {
        return IterationState {
            thought: thought.unwrap_or_default(),
            action: None,
            action_input: None,
            tool_call_id: None,
            final_answer: Some(answer),
            thought_response: serialized,
            parse_degraded: false,
        };
    }

    // Neither action nor final answer: an unrecognized structured reply
    // is treated as an implicit final answer.
    IterationState {
        thought: thought.unwrap_or_default(),
        action: None,
        action_input: None,
        tool_call_id: None,
        final_answer: Some(serialized.clone()),
        thought_response: serialized,
        parse_degraded: true,
    }
}

fn recover_with_regex(text: &str, tools: &BTreeSet<String>) -> IterationState {
    let thought = capture(&THOUGHT_RE, text);
    let declared_action = capture(&ACTION_RE, text);
    let action_input = capture(&ACTION_INPUT_RE, text);
    let final_answer = capture(&FINAL_ANSWER_RE, text);

    if let Some(declared) = &declared_action {
        if let Some(tool) = match_tool(declared, tools) {
            return IterationState {
                thought: thought.unwrap_or_default(),
                action: Some(tool),
                action_input,
                tool_call_id: None,
                final_answer: None,
                thought_response: text.to_string(),
                parse_degraded: false,
            };
        }
    }

    if let Some(answer) = final_answer {
        return IterationState {
            thought: thought.unwrap_or_default(),
            action: None,
            action_input: None,
            tool_call_id: None,
            final_answer: Some(answer),
            thought_response: text.to_string(),
            parse_degraded: false,
        };
    }

    // Plain prose: the whole reply is the answer.
    IterationState {
        thought: thought.unwrap_or_default(),
        action: None,
        action_input: None,
        tool_call_id: None,
        final_answer: Some(text.to_string()),
        thought_response: text.to_string(),
        parse_degraded: true,
    }
}

fn parse_generic_text(text: &str, tools: &BTreeSet<String>) -> IterationState {
    for candidate in json_candidates(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            return classify_object(&map, Some(&candidate), tools);
        }
    }
    recover_with_regex(text, tools)
}

fn parse_generic_value(body: &Value, tools: &BTreeSet<String>) -> IterationState {
    match body {
        Value::String(text) => parse_generic_text(text, tools),
        Value::Object(map) => {
            // The common wrapped-text shape.
            if map.len() == 1 {
                if let Some(Value::String(text)) = map.get("response") {
                    return parse_generic_text(text, tools);
                }
            }
            classify_object(map, None, tools)
        }
        other => IterationState {
            thought: String::new(),
            action: None,
            action_input: None,
            tool_call_id: None,
            final_answer: Some(other.to_string()),
            thought_response: other.to_string(),
            parse_degraded: true,
        },
    }
}

// ── Entry point ───────────────────────────────────────────────────────────

/// Parse a model response under the given dialect.
///
/// Native responses without a matching tool call fall through to the
/// generic dialect on their extracted free text.
pub fn parse_model_output(
    response: &ModelResponse,
    dialect: &ResponseDialect,
    tools: &BTreeSet<String>,
) -> IterationState {
    match dialect {
        ResponseDialect::Native(config) => {
            if let Some(state) = parse_native(&response.body, config) {
                return state;
            }
            if let Some(text) = resolve_string(&response.body, &config.response_filter) {
                return parse_generic_text(&text, tools);
            }
            parse_generic_value(&response.body, tools)
        }
        ResponseDialect::Generic => parse_generic_value(&response.body, tools),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
