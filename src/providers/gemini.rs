use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;

use crate::config::GeminiConfig;
use crate::llm_manager::{Completion, FunctionCall, FunctionDeclaration, LLMProvider};

/// Gemini `generateContent` provider implementation
pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetails {
    code: Option<u16>,
    message: String,
    status: Option<String>,
}

impl GeminiProvider {
    /// Create a provider from config, reading the API key from the configured variable.
    ///
    /// A missing key is not fatal here; the first request reports it.
    pub fn new(config: &GeminiConfig) -> Self {
        let api_key = env::var(&config.api_key_env).unwrap_or_else(|_| {
            warn!(
                "{} is not set; requests to Gemini will be rejected",
                config.api_key_env
            );
            String::new()
        });

        Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client: Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request<'a>(
        &self,
        prompt: &str,
        tools: &'a [FunctionDeclaration],
    ) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                    function_call: None,
                }],
            }],
            tools: if tools.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations: tools,
                }]
            },
            generation_config: self
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        }
    }

    async fn generate(&self, prompt: &str, tools: &[FunctionDeclaration]) -> Result<Completion> {
        let request = self.build_request(prompt, tools);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("Failed to read Gemini response body")?;

        if !status.is_success() {
            return Err(api_error(status, &response_text));
        }

        let gemini_response: GenerateContentResponse =
            serde_json::from_str(&response_text).context("Failed to parse Gemini response")?;

        if let Some(usage) = &gemini_response.usage_metadata {
            info!(
                "Gemini token usage - Prompt: {}, Completion: {}, Total: {}",
                usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
            );
        }

        Ok(gemini_response.into_completion())
    }
}

impl GenerateContentResponse {
    /// Keep the first text part and the first function call of the first candidate.
    fn into_completion(self) -> Completion {
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Completion::default();
        };

        if let Some(finish_reason) = &candidate.finish_reason {
            match finish_reason.as_str() {
                "STOP" => {}
                "MAX_TOKENS" => {
                    warn!("Gemini response was truncated due to the output token limit");
                }
                other => {
                    warn!("Gemini response finished with reason: {}", other);
                }
            }
        }

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        let text = parts.iter().find_map(|part| part.text.clone());
        let function_call = parts
            .into_iter()
            .find_map(|part| part.function_call)
            .map(|call| FunctionCall {
                name: call.name,
                args: call.args,
            });

        Completion {
            text,
            function_call,
        }
    }
}

fn api_error(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(error_response) = serde_json::from_str::<GeminiError>(body) {
        let error = error_response.error;
        let code = error
            .code
            .map(|code| format!(", code: {}", code))
            .unwrap_or_default();
        anyhow!(
            "Gemini API error: {} (status: {}{})",
            error.message,
            error.status.as_deref().unwrap_or("UNKNOWN"),
            code
        )
    } else {
        anyhow!("Gemini API error (status {}): {}", status, body)
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn name(&self) -> &str {
        "Gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_prompt(&self, prompt: &str) -> Result<Completion> {
        self.generate(prompt, &[]).await
    }

    async fn send_prompt_with_tools(
        &self,
        prompt: &str,
        tools: &[FunctionDeclaration],
    ) -> Result<Completion> {
        self.generate(prompt, tools).await
    }
}
