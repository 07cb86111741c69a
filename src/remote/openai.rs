//! OpenAI-compatible HTTP backend (blocking, `ureq`).
//!
//! Text requests go to `/chat/completions`; when a tool schema is present the
//! model is forced to call it. Images go to `/images/generations` and come back
//! base64-encoded.

use std::io::Read;
use std::time::Duration;

use serde_json::{Value, json};

use crate::config::RemoteConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{Backend, Completion, GenerationRequest};

/// Backend for the OpenAI REST API.
pub struct OpenAiBackend {
    config: RemoteConfig,
    api_key: String,
    agent: ureq::Agent,
}

impl OpenAiBackend {
    /// Create a backend, reading the API key from `config.api_key_env`.
    pub fn from_env(config: RemoteConfig) -> RemoteResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| RemoteError::MissingApiKey {
            var: config.api_key_env.clone(),
        })?;
        Ok(Self::new(config, api_key))
    }

    pub fn new(config: RemoteConfig, api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            config,
            api_key,
            agent,
        }
    }

    fn post(&self, path: &str, body: &Value) -> RemoteResult<Value> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let body_str = serde_json::to_string(body).map_err(|e| RemoteError::Request {
            url: url.clone(),
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_string(&body_str)
            .map_err(|e| match e {
                ureq::Error::Status(status, resp) => RemoteError::Status {
                    status,
                    body: resp.into_string().unwrap_or_default(),
                },
                ureq::Error::Transport(t) => RemoteError::Request {
                    url: url.clone(),
                    message: t.to_string(),
                },
            })?;

        // Image payloads can exceed `into_string`'s size cap.
        let mut resp_str = String::new();
        resp.into_reader()
            .read_to_string(&mut resp_str)
            .map_err(|e| RemoteError::Request {
                url: url.clone(),
                message: format!("reading response body: {e}"),
            })?;

        serde_json::from_str(&resp_str).map_err(|e| RemoteError::Parse {
            message: format!("response from {url} is not JSON: {e}"),
        })
    }

    /// Request body for a chat completion.
    fn completion_body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.config.text_model,
            "max_tokens": self.config.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });

        if let Some(temperature) = request.sampling.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(n) = request.sampling.samples {
            body["n"] = json!(n);
        }
        if let Some(tool) = &request.tool {
            body["tools"] = json!([{
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            }]);
            body["tool_choice"] = json!({
                "type": "function",
                "function": { "name": tool.name },
            });
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

impl Backend for OpenAiBackend {
    fn complete(&self, request: &GenerationRequest) -> RemoteResult<Vec<Completion>> {
        tracing::debug!(key = %request.key, model = %self.config.text_model, "chat completion");
        let response = self.post("chat/completions", &self.completion_body(request))?;
        parse_choices(&response, request.tool.is_some())
    }

    fn image(&self, prompt: &str) -> RemoteResult<Vec<u8>> {
        tracing::debug!(model = %self.config.image_model, "image generation");
        let body = json!({
            "model": self.config.image_model,
            "prompt": prompt,
            "quality": "standard",
            "n": 1,
            "response_format": "b64_json",
        });
        let response = self.post("images/generations", &body)?;
        let encoded = response["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| RemoteError::Parse {
                message: "missing 'data[0].b64_json' field".into(),
            })?;
        base64_decode(encoded).map_err(|_| RemoteError::Parse {
            message: "image payload is not valid base64".into(),
        })
    }
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.config.base_url)
            .field("text_model", &self.config.text_model)
            .field("image_model", &self.config.image_model)
            .finish()
    }
}

/// Pull every choice out of a chat-completion response.
fn parse_choices(response: &Value, tool: bool) -> RemoteResult<Vec<Completion>> {
    let choices = response["choices"]
        .as_array()
        .ok_or_else(|| RemoteError::Parse {
            message: "missing 'choices' array".into(),
        })?;

    choices
        .iter()
        .map(|choice| {
            let message = &choice["message"];
            if tool {
                message["tool_calls"][0]["function"]["arguments"]
                    .as_str()
                    .map(|args| Completion::ToolArguments(args.to_string()))
                    .ok_or_else(|| RemoteError::Parse {
                        message: "choice has no tool call arguments".into(),
                    })
            } else {
                message["content"]
                    .as_str()
                    .map(|content| Completion::Text(content.to_string()))
                    .ok_or_else(|| RemoteError::Parse {
                        message: "choice has no message content".into(),
                    })
            }
        })
        .collect()
}

/// Minimal base64 decoder (standard alphabet, padding optional, whitespace ignored).
fn base64_decode(input: &str) -> Result<Vec<u8>, ()> {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut output = Vec::with_capacity(input.len() * 3 / 4);
    let mut buf: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in input.as_bytes() {
        if byte == b'=' {
            break;
        }
        if byte.is_ascii_whitespace() {
            continue;
        }
        let val = TABLE.iter().position(|&c| c == byte).ok_or(())? as u32;
        buf = (buf << 6) | val;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            output.push((buf >> bits) as u8);
            buf &= (1 << bits) - 1;
        }
    }

    Ok(output)
}
