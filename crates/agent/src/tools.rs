//! Tool registry: a fixed name -> (schema, executor) table built once at startup.
//!
//! The `tools` graph node never fails because of a tool. Lookup, argument and execution
//! errors are rendered into the tool-result message for the model to read.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use brainstorm_core::domain::message::{Message, ToolCall};
use brainstorm_core::domain::state::ThreadKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
    Integer,
    Enum(&'static [&'static str]),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self { name, kind, description, required: true, default: None }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        description: &'static str,
        default: Value,
    ) -> Self {
        Self { name, kind, description, required: false, default: Some(default) }
    }

    fn json_schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Boolean => json!({ "type": "boolean" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Enum(values) => json!({ "type": "string", "enum": values }),
        };
        if let Value::Object(ref mut map) = schema {
            map.insert("description".to_string(), Value::String(self.description.to_string()));
            if let Some(default) = &self.default {
                map.insert("default".to_string(), default.clone());
            }
        }
        schema
    }

    fn coerce(&self, value: Value) -> Result<Value, String> {
        const I64_RANGE: std::ops::Range<f64> = i64::MIN as f64..i64::MAX as f64;

        match (self.kind, value) {
            (ParamKind::String, Value::String(text)) => Ok(Value::String(text)),
            (ParamKind::String, Value::Number(number)) => Ok(Value::String(number.to_string())),
            (ParamKind::String, Value::Bool(flag)) => Ok(Value::String(flag.to_string())),
            (ParamKind::Boolean, Value::Bool(flag)) => Ok(Value::Bool(flag)),
            (ParamKind::Boolean, Value::String(text)) => {
                match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(Value::Bool(true)),
                    "false" | "no" | "0" => Ok(Value::Bool(false)),
                    _ => Err(format!("`{}` expects a boolean, got `{text}`", self.name)),
                }
            }
            (ParamKind::Integer, Value::Number(number)) => match number.as_i64() {
                Some(int) => Ok(json!(int)),
                None => match number.as_f64() {
                    Some(float) if float.fract() == 0.0 && I64_RANGE.contains(&float) => {
                        Ok(json!(float as i64))
                    }
                    _ => Err(format!("`{}` expects an integer, got `{number}`", self.name)),
                },
            },
            (ParamKind::Integer, Value::String(text)) => text
                .trim()
                .parse::<i64>()
                .map(|int| json!(int))
                .map_err(|_| format!("`{}` expects an integer, got `{text}`", self.name)),
            (ParamKind::Enum(values), Value::String(text)) => {
                let normalized = text.trim().to_ascii_lowercase();
                if values.contains(&normalized.as_str()) {
                    Ok(Value::String(normalized))
                } else {
                    Err(format!(
                        "`{}` must be one of {}, got `{text}`",
                        self.name,
                        values.join("|")
                    ))
                }
            }
            (kind, other) => {
                Err(format!("`{}` has the wrong type for {kind:?}: {other}", self.name))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// JSON-schema object describing the parameters, in the shape chat-completion APIs expect.
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|param| (param.name.to_string(), param.json_schema()))
            .collect();
        let required: Vec<&str> =
            self.params.iter().filter(|param| param.required).map(|param| param.name).collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks required parameters, fills defaults and coerces loosely-typed values.
    ///
    /// Keys that are not part of the schema are dropped.
    pub fn validate(&self, arguments: &Value) -> Result<ToolArgs, ToolError> {
        let provided = match arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            Value::String(raw) if raw.trim().is_empty() => Map::new(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => {
                    return Err(ToolError::InvalidArguments {
                        tool: self.name.to_string(),
                        message: "arguments must be a JSON object".to_string(),
                    })
                }
            },
            _ => {
                return Err(ToolError::InvalidArguments {
                    tool: self.name.to_string(),
                    message: "arguments must be a JSON object".to_string(),
                })
            }
        };

        let mut values = BTreeMap::new();
        for param in &self.params {
            let raw = provided.get(param.name).cloned().filter(|value| !value.is_null());
            let value = match (raw, &param.default) {
                (Some(value), _) => param.coerce(value).map_err(|message| {
                    ToolError::InvalidArguments { tool: self.name.to_string(), message }
                })?,
                (None, Some(default)) => default.clone(),
                (None, None) if param.required => {
                    return Err(ToolError::InvalidArguments {
                        tool: self.name.to_string(),
                        message: format!("missing required argument `{}`", param.name),
                    })
                }
                (None, None) => continue,
            };
            values.insert(param.name, value);
        }

        Ok(ToolArgs { tool: self.name, values })
    }
}

/// Validated arguments for one call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolArgs {
    tool: &'static str,
    values: BTreeMap<&'static str, Value>,
}

impl ToolArgs {
    pub fn str(&self, name: &str) -> Result<&str, ToolError> {
        self.values.get(name).and_then(Value::as_str).ok_or_else(|| self.missing(name))
    }

    pub fn bool(&self, name: &str) -> Result<bool, ToolError> {
        self.values.get(name).and_then(Value::as_bool).ok_or_else(|| self.missing(name))
    }

    pub fn optional_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    fn missing(&self, name: &str) -> ToolError {
        ToolError::InvalidArguments {
            tool: self.tool.to_string(),
            message: format!("argument `{name}` is not available"),
        }
    }
}

/// Identity of the conversation a tool runs for. Tools read the owning user from here,
/// never from model-supplied arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolContext {
    pub thread: ThreadKey,
    pub correlation_id: String,
}

impl ToolContext {
    pub fn new(thread: ThreadKey, correlation_id: impl Into<String>) -> Self {
        Self { thread, correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    /// Entries appended to the session's memory.
    pub memory: Vec<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), memory: Vec::new() }
    }

    pub fn remember(mut self, entry: impl Into<String>) -> Self {
        self.memory.push(entry.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("`{tool}` failed: {message}")]
    Execution { tool: String, message: String },
}

impl ToolError {
    pub fn execution(tool: &str, message: impl Into<String>) -> Self {
        Self::Execution { tool: tool.to_string(), message: message.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Execution { .. } => "execution",
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;
    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Result of running one tool call inside the `tools` node.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDispatch {
    pub message: Message,
    pub memory: Vec<String>,
    pub error: Option<ToolError>,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let name = tool.spec().name;
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn with<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec().clone()).collect()
    }

    /// Looks up, validates and executes a single tool by name.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = tool.spec().validate(arguments)?;
        tool.execute(args, ctx).await
    }

    /// Runs one model-issued call and always produces exactly one tool-result message
    /// carrying the call id.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolDispatch {
        match self.execute(&call.name, &call.arguments, ctx).await {
            Ok(output) => {
                info!(
                    event_name = "agent.tool.completed",
                    thread_id = %ctx.thread,
                    correlation_id = %ctx.correlation_id,
                    tool = %call.name,
                    call_id = %call.id,
                    memory_entries = output.memory.len(),
                    "tool call completed"
                );
                ToolDispatch {
                    message: Message::tool_result(call.id.clone(), output.content),
                    memory: output.memory,
                    error: None,
                }
            }
            Err(error) => {
                warn!(
                    event_name = "agent.tool.failed",
                    thread_id = %ctx.thread,
                    correlation_id = %ctx.correlation_id,
                    tool = %call.name,
                    call_id = %call.id,
                    error_kind = error.kind(),
                    error = %error,
                    "tool call failed; returning error text to the model"
                );
                ToolDispatch {
                    message: Message::tool_result(call.id.clone(), format!("Error: {error}")),
                    memory: Vec::new(),
                    error: Some(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use brainstorm_core::domain::message::{Role, ToolCall};
    use brainstorm_core::domain::state::ThreadKey;

    use super::{
        ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolOutput, ToolRegistry,
        ToolSpec,
    };

    struct EchoTool {
        spec: ToolSpec,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                spec: ToolSpec {
                    name: "echo",
                    description: "Echo the text back.",
                    params: vec![
                        ParamSpec::required("text", ParamKind::String, "text to echo"),
                        ParamSpec::optional("loud", ParamKind::Boolean, "uppercase", json!(false)),
                        ParamSpec::optional(
                            "depth",
                            ParamKind::Enum(&["shallow", "medium", "deep"]),
                            "depth",
                            json!("medium"),
                        ),
                    ],
                },
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(
            &self,
            args: ToolArgs,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            let text = args.str("text")?;
            if text == "boom" {
                return Err(ToolError::execution("echo", "exploded"));
            }
            let text = if args.bool("loud")? { text.to_uppercase() } else { text.to_string() };
            Ok(ToolOutput::text(format!("{text}/{}", args.str("depth")?)))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(ThreadKey::new("alice", "s-1").expect("key"), "run-1")
    }

    #[test]
    fn validation_fills_defaults_and_coerces_strings() {
        let spec = EchoTool::new().spec;

        let args = spec
            .validate(&json!({ "text": 42, "loud": "true", "depth": "DEEP", "extra": 1 }))
            .expect("valid");

        assert_eq!(args.str("text"), Ok("42"));
        assert_eq!(args.bool("loud"), Ok(true));
        assert_eq!(args.str("depth"), Ok("deep"));
        assert!(args.optional_str("extra").is_none());
    }

    #[test]
    fn validation_rejects_missing_required_and_bad_enum() {
        let spec = EchoTool::new().spec;

        let missing = spec.validate(&json!({}));
        let bad_enum = spec.validate(&json!({ "text": "x", "depth": "bottomless" }));
        let not_object = spec.validate(&json!([1, 2]));

        assert!(matches!(
            missing,
            Err(ToolError::InvalidArguments { ref message, .. }) if message.contains("text")
        ));
        assert!(matches!(bad_enum, Err(ToolError::InvalidArguments { .. })));
        assert!(matches!(not_object, Err(ToolError::InvalidArguments { .. })));
    }

    #[test]
    fn integral_floats_outside_i64_are_rejected() {
        let count = ParamSpec::required("count", ParamKind::Integer, "how many");

        assert_eq!(count.coerce(json!(3.0)), Ok(json!(3)));
        assert_eq!(count.coerce(json!(-9.223372036854775808e18)), Ok(json!(i64::MIN)));
        assert!(count.coerce(json!(1e19)).is_err());
        assert!(count.coerce(json!(-1e300)).is_err());
        assert!(count.coerce(json!(2.5)).is_err());
    }

    #[test]
    fn schema_lists_required_parameters() {
        let schema = EchoTool::new().spec.parameters_schema();

        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["depth"]["enum"], json!(["shallow", "medium", "deep"]));
        assert_eq!(schema["properties"]["loud"]["default"], json!(false));
    }

    #[tokio::test]
    async fn dispatch_turns_every_failure_into_a_tool_result() {
        let registry = ToolRegistry::default().with(EchoTool::new());

        let ok =
            registry.dispatch(&ToolCall::new("c1", "echo", json!({ "text": "hi" })), &ctx()).await;
        let unknown = registry.dispatch(&ToolCall::new("c2", "nope", json!({})), &ctx()).await;
        let invalid = registry.dispatch(&ToolCall::new("c3", "echo", json!({})), &ctx()).await;
        let boom = ToolCall::new("c4", "echo", json!({ "text": "boom" }));
        let failed = registry.dispatch(&boom, &ctx()).await;

        assert_eq!(ok.message.content, "hi/medium");
        assert_eq!(ok.message.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(unknown.message.role, Role::Tool);
        assert_eq!(unknown.message.content, "Error: unknown tool `nope`");
        assert_eq!(unknown.error, Some(ToolError::UnknownTool("nope".to_string())));
        assert_eq!(invalid.message.tool_call_id.as_deref(), Some("c3"));
        assert!(invalid.message.content.starts_with("Error: invalid arguments for `echo`"));
        assert_eq!(failed.message.content, "Error: `echo` failed: exploded");
    }

    #[test]
    fn arguments_encoded_as_json_strings_are_accepted() {
        let spec = EchoTool::new().spec;
        let args = spec.validate(&json!("{\"text\": \"hello\"}")).expect("valid");

        assert_eq!(args.str("text"), Ok("hello"));
    }
}
