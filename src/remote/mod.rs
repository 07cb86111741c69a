//! Remote generation adapter.
//!
//! [`Generator`] turns a [`GenerationRequest`] into plain data: free text becomes
//! a JSON string, tool output is decoded (tolerating truncation) and list-shaped
//! tools are unwrapped from their `items` field. Transport is delegated to a
//! [`Backend`], which is [`openai::OpenAiBackend`] in production and an
//! in-process fake in tests.
//!
//! The adapter never retries. A call either returns a complete value or a
//! [`RemoteError`]; callers that need resilience wrap the backend.

pub mod openai;
pub mod partial_json;

use serde_json::{Map, Value, json};

use crate::error::{RemoteError, RemoteResult};

/// A function-call shape the text backend is forced to answer with.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's arguments.
    pub parameters: Value,
    /// Whether `parameters` is a single `items` array wrapping the real payload.
    pub list: bool,
}

impl ToolSchema {
    /// A tool whose arguments are one object with the given string fields.
    pub fn object(name: &str, description: &str, fields: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: object_schema(fields),
            list: false,
        }
    }

    /// A tool whose arguments are `{"items": [..]}` of objects with the given fields.
    pub fn list(name: &str, description: &str, fields: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "description": "List of items",
                        "items": object_schema(fields),
                    }
                },
                "required": ["items"],
            }),
            list: true,
        }
    }
}

fn object_schema(fields: &[(&str, &str)]) -> Value {
    let mut properties = Map::new();
    for (field, description) in fields {
        properties.insert(
            (*field).to_string(),
            json!({ "type": "string", "description": description }),
        );
    }
    let required: Vec<&str> = fields.iter().map(|(f, _)| *f).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Optional sampling controls for a text request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    /// Number of independent samples. When set, the result is always a list.
    pub samples: Option<u32>,
}

/// One memoizable text-generation request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Stable cache key; changes whenever the prompt's meaning changes.
    pub key: String,
    pub prompt: String,
    pub tool: Option<ToolSchema>,
    pub sampling: SamplingParams,
}

/// Raw output of one backend sample, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Plain assistant message content.
    Text(String),
    /// Arguments string of the forced tool call, possibly truncated JSON.
    ToolArguments(String),
}

/// Transport to the remote text and image services.
pub trait Backend: Send + Sync {
    /// Run one chat completion and return every sample the backend produced.
    fn complete(&self, request: &GenerationRequest) -> RemoteResult<Vec<Completion>>;

    /// Generate exactly one image for `prompt`, returned as encoded raster bytes.
    fn image(&self, prompt: &str) -> RemoteResult<Vec<u8>>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn complete(&self, request: &GenerationRequest) -> RemoteResult<Vec<Completion>> {
        (**self).complete(request)
    }

    fn image(&self, prompt: &str) -> RemoteResult<Vec<u8>> {
        (**self).image(prompt)
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn complete(&self, request: &GenerationRequest) -> RemoteResult<Vec<Completion>> {
        (**self).complete(request)
    }

    fn image(&self, prompt: &str) -> RemoteResult<Vec<u8>> {
        (**self).image(prompt)
    }
}

/// Normalizes backend responses into plain JSON values and bytes.
#[derive(Debug)]
pub struct Generator<B> {
    backend: B,
}

impl<B: Backend> Generator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Generate text for `request`.
    ///
    /// Returns a JSON string for free text, the decoded object (or unwrapped
    /// list) for tool requests, and an array of those when `samples` is set.
    pub fn generate_text(&self, request: &GenerationRequest) -> RemoteResult<Value> {
        let completions = self.backend.complete(request)?;
        let mut decoded = Vec::with_capacity(completions.len());
        for completion in completions {
            decoded.push(decode_completion(completion, request.tool.as_ref())?);
        }

        if request.sampling.samples.is_some() {
            return Ok(Value::Array(decoded));
        }
        decoded.into_iter().next().ok_or_else(|| RemoteError::Parse {
            message: format!("backend returned no choices for \"{}\"", request.key),
        })
    }

    /// Generate one image for `prompt`.
    pub fn generate_image(&self, prompt: &str) -> RemoteResult<Vec<u8>> {
        let bytes = self.backend.image(prompt)?;
        if bytes.is_empty() {
            return Err(RemoteError::Parse {
                message: "image backend returned an empty payload".into(),
            });
        }
        Ok(bytes)
    }
}

fn decode_completion(completion: Completion, tool: Option<&ToolSchema>) -> RemoteResult<Value> {
    match (completion, tool) {
        (Completion::ToolArguments(args), Some(_)) => {
            let value = partial_json::parse_partial(&args)?;
            Ok(unwrap_items(value))
        }
        (Completion::ToolArguments(args), None) => Ok(Value::String(args)),
        (Completion::Text(text), Some(tool)) => Err(RemoteError::Parse {
            message: format!(
                "expected a \"{}\" tool call but got plain text ({} chars)",
                tool.name,
                text.len()
            ),
        }),
        (Completion::Text(text), None) => Ok(Value::String(text)),
    }
}

/// `{"items": [..]}` → `[..]`; anything else is returned unchanged.
fn unwrap_items(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("items") => {
            map.remove("items").unwrap_or(Value::Null)
        }
        other => other,
    }
}
