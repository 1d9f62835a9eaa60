//! Model clients: build a provider request and expose its answer as a publisher

use super::model::{LanguageModel, ModelSettings, WireFormat};
use super::transport::{api_error, extract_error_detail, HttpTransport};
use crate::stream::{
    Emitter, FailureProducer, LineStreamProducer, Publisher, StatusGatedProducer, StreamError,
    ValueProducer,
};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant integrated inside a keyboard.";
const GEMINI_ACKNOWLEDGEMENT: &str = "Understood. I will follow these instructions.";
const SSE_DONE: &str = "[DONE]";
pub const MISSING_API_KEY: &str = "Missing API Key";

/// A configured provider able to answer prompts
pub trait LanguageModelClient: Send + Sync {
    fn settings(&self) -> &ModelSettings;

    /// Start a request. Failures are reported through the returned
    /// publisher, never by panicking or returning early.
    fn submit_prompt(&self, prompt: &str, system_message: Option<&str>) -> Arc<dyn Publisher>;

    fn language_model(&self) -> LanguageModel {
        self.settings().model
    }

    fn api_key(&self) -> Option<&str> {
        self.settings().api_key()
    }
}

/// Client matching the model's wire format
pub fn client_for(
    settings: ModelSettings,
    transport: HttpTransport,
    streaming: bool,
) -> Arc<dyn LanguageModelClient> {
    match settings.model.wire_format() {
        WireFormat::ChatCompletions => {
            Arc::new(ChatCompletionsClient::new(settings, transport, streaming))
        }
        WireFormat::Gemini => {
            if streaming {
                debug!("Streaming is not used for Gemini, falling back to a single response");
            }
            Arc::new(GeminiClient::new(settings, transport))
        }
    }
}

fn effective_system_message(system_message: Option<&str>) -> &str {
    system_message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(DEFAULT_SYSTEM_MESSAGE)
}

fn missing_key(model: LanguageModel) -> Arc<dyn Publisher> {
    debug!("{} has no API key configured", model.label());
    Arc::new(ValueProducer::new(MISSING_API_KEY))
}

fn invalid_endpoint(endpoint: &str, e: impl std::fmt::Display) -> Arc<dyn Publisher> {
    Arc::new(FailureProducer::new(StreamError::transport(
        None,
        format!("Invalid endpoint {endpoint}: {e}"),
    )))
}

/// Body lines joined without separators. Stops with `Cancelled` as soon
/// as the subscriber is gone.
fn collect_body(reader: &mut dyn BufRead, emitter: &Emitter) -> Result<String, StreamError> {
    let mut body = String::new();
    for line in reader.lines() {
        if emitter.is_done() {
            return Err(StreamError::Cancelled);
        }
        match line {
            Ok(line) => body.push_str(&line),
            Err(_) if emitter.is_cancelled() => return Err(StreamError::Cancelled),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(body)
}

// ─── Chat Completions ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    max_completion_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Client for every provider speaking the `/chat/completions` dialect
pub struct ChatCompletionsClient {
    settings: ModelSettings,
    transport: HttpTransport,
    streaming: bool,
}

impl ChatCompletionsClient {
    pub fn new(settings: ModelSettings, transport: HttpTransport, streaming: bool) -> Self {
        Self {
            settings,
            transport,
            streaming,
        }
    }
}

impl LanguageModelClient for ChatCompletionsClient {
    fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    fn submit_prompt(&self, prompt: &str, system_message: Option<&str>) -> Arc<dyn Publisher> {
        let Some(api_key) = self.settings.api_key() else {
            return missing_key(self.settings.model);
        };
        let endpoint = self.settings.endpoint("chat/completions");
        if let Err(e) = reqwest::Url::parse(&endpoint) {
            return invalid_endpoint(&endpoint, e);
        }

        let body = ChatRequest {
            model: &self.settings.sub_model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(effective_system_message(system_message).to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(prompt.to_string()),
                },
            ],
            stream: self.streaming,
            max_completion_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
        };
        debug!(
            model = %self.settings.sub_model,
            streaming = self.streaming,
            "Submitting chat completion request"
        );
        let request = self
            .transport
            .client()
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&body);

        if self.streaming {
            let source = self.transport.open_stream(request);
            return Arc::new(
                LineStreamProducer::new(source, sse_delta_content)
                    .with_runtime(self.transport.runtime().clone()),
            );
        }

        let sub_model = self.settings.sub_model.clone();
        let producer =
            StatusGatedProducer::new(decode_chat_response, move |status, reader, emitter| {
                let body = collect_body(reader, emitter)?;
                Err(chat_error(status, &body, &sub_model))
            });
        self.transport.exchange(request, producer.gate());
        Arc::new(producer)
    }
}

fn decode_chat_response(
    _status: u16,
    reader: &mut dyn BufRead,
    emitter: &Emitter,
) -> Result<(), StreamError> {
    let body = collect_body(reader, emitter)?;
    let response: ChatResponse = serde_json::from_str(&body)
        .map_err(|e| StreamError::Decode(format!("Invalid chat response: {e}")))?;
    let choices = response
        .choices
        .ok_or_else(|| StreamError::Decode("no \"choices\" attribute found".to_string()))?;

    let content = choices
        .iter()
        .find(|c| c.message.role == "assistant")
        .or_else(|| choices.first())
        .map(|c| c.message.content.clone().unwrap_or_default())
        .ok_or_else(|| StreamError::Decode("choices has length 0".to_string()))?;

    emitter.next(content);
    Ok(())
}

/// Error decoder output for a non-200 chat completion
fn chat_error(status: u16, body: &str, sub_model: &str) -> StreamError {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return api_error(status, &extract_error_detail(body));
    };
    let Some(error) = value.get("error").filter(|e| e.is_object()) else {
        return api_error(status, &extract_error_detail(body));
    };

    let field = |name: &str| error.get(name).and_then(|v| v.as_str()).unwrap_or("");
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or(body);
    let (code, kind) = (field("code"), field("type"));

    let friendly = if code == "insufficient_quota" || message.contains("quota") {
        "API quota exceeded. Check your billing or use a different model".to_string()
    } else if code == "invalid_api_key" || message.contains("API key") {
        "Invalid API key. Please check your API key".to_string()
    } else if code == "model_not_found" || message.contains("does not exist") {
        format!("Model not found: {sub_model}. Please check the model name")
    } else if kind == "rate_limit_exceeded" {
        "Rate limit exceeded. Please wait and try again".to_string()
    } else {
        message.to_string()
    };
    api_error(status, &friendly)
}

/// Maps one server-sent-events line to the delta text it carries.
///
/// Anything that is not a content delta maps to an empty string.
pub fn sse_delta_content(line: String) -> String {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return String::new();
    };
    let data = data.trim();
    if data.is_empty() || data == SSE_DONE {
        return String::new();
    }
    serde_json::from_str::<StreamChunk>(data)
        .ok()
        .and_then(|chunk| chunk.choices.into_iter().next())
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default()
}

// ─── Gemini ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: u16,
    message: Option<String>,
    #[serde(default)]
    status: String,
}

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

fn gemini_turn(role: &str, text: &str) -> GeminiContent {
    GeminiContent {
        role: Some(role.to_string()),
        parts: vec![GeminiPart {
            text: Some(text.to_string()),
        }],
    }
}

pub struct GeminiClient {
    settings: ModelSettings,
    transport: HttpTransport,
}

impl GeminiClient {
    pub fn new(settings: ModelSettings, transport: HttpTransport) -> Self {
        Self {
            settings,
            transport,
        }
    }
}

impl LanguageModelClient for GeminiClient {
    fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    fn submit_prompt(&self, prompt: &str, system_message: Option<&str>) -> Arc<dyn Publisher> {
        let Some(api_key) = self.settings.api_key() else {
            return missing_key(self.settings.model);
        };
        let endpoint = self
            .settings
            .endpoint(&format!("models/{}:generateContent", self.settings.sub_model));
        if let Err(e) = reqwest::Url::parse(&endpoint) {
            return invalid_endpoint(&endpoint, e);
        }

        // Instructions travel as a user turn acknowledged by the model.
        let body = GeminiRequest {
            contents: vec![
                gemini_turn("user", effective_system_message(system_message)),
                gemini_turn("model", GEMINI_ACKNOWLEDGEMENT),
                gemini_turn("user", prompt),
            ],
            generation_config: GenerationConfig {
                max_output_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        };
        debug!(model = %self.settings.sub_model, "Submitting Gemini request");
        let request = self
            .transport
            .client()
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body);

        let sub_model = self.settings.sub_model.clone();
        let producer =
            StatusGatedProducer::new(decode_gemini_response, move |status, reader, emitter| {
                let body = collect_body(reader, emitter)?;
                Err(gemini_error(status, &body, &sub_model))
            });
        self.transport.exchange(request, producer.gate());
        Arc::new(producer)
    }
}

fn decode_gemini_response(
    _status: u16,
    reader: &mut dyn BufRead,
    emitter: &Emitter,
) -> Result<(), StreamError> {
    let body = collect_body(reader, emitter)?;
    let response: GeminiResponse = serde_json::from_str(&body)
        .map_err(|e| StreamError::Decode(format!("Invalid Gemini response: {e}")))?;

    if let Some(candidates) = response.candidates {
        let text = candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .unwrap_or_default();
        emitter.next(text);
        return Ok(());
    }
    if let Some(error) = response.error {
        return Err(StreamError::Decode(format!(
            "API Error: {}",
            error.message.as_deref().unwrap_or("Unknown error")
        )));
    }
    Err(StreamError::Decode(
        "No \"candidates\" attribute found in response".to_string(),
    ))
}

/// Error decoder output for a non-200 Gemini response
fn gemini_error(status: u16, body: &str, sub_model: &str) -> StreamError {
    let Some(error) = serde_json::from_str::<GeminiResponse>(body)
        .ok()
        .and_then(|r| r.error)
    else {
        return api_error(status, &extract_error_detail(body));
    };

    let message = error.message.as_deref().unwrap_or(body);
    let code = if error.code == 0 { status } else { error.code };
    let friendly = if code == 429 || error.status == "RESOURCE_EXHAUSTED" {
        if message.contains("limit: 0") {
            "This model requires a paid plan. Enable billing or use a different model like gemini-2.5-flash"
                .to_string()
        } else {
            "Rate limit exceeded. Please wait a moment and try again".to_string()
        }
    } else if code == 404 {
        format!("Model not found: {sub_model}. Please check the model name")
    } else if code == 403 {
        "Access denied. Check your API key permissions".to_string()
    } else if code == 400 {
        format!("Invalid request: {message}")
    } else {
        message.to_string()
    };
    api_error(status, &friendly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{Recorder, Signal};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn decode(
        decoder: fn(u16, &mut dyn BufRead, &Emitter) -> Result<(), StreamError>,
        body: &str,
    ) -> (Result<(), StreamError>, Vec<Signal>) {
        let recorder = Recorder::passive();
        let emitter = Emitter::new(recorder.clone());
        let mut reader = Cursor::new(body.as_bytes().to_vec());
        let outcome = decoder(200, &mut reader, &emitter);
        (outcome, recorder.signals())
    }

    #[test]
    fn test_sse_delta_content() {
        assert_eq!(
            sse_delta_content(r#"data: {"choices":[{"delta":{"content":"Bon"}}]}"#.to_string()),
            "Bon"
        );
        assert_eq!(sse_delta_content("data: [DONE]".to_string()), "");
        assert_eq!(sse_delta_content(": keep-alive".to_string()), "");
        assert_eq!(sse_delta_content(String::new()), "");
        assert_eq!(
            sse_delta_content(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#.to_string()),
            ""
        );
    }

    #[test]
    fn test_chat_decoder_prefers_assistant_choice() {
        let body = r#"{"choices":[
            {"message":{"role":"tool","content":"skip"}},
            {"message":{"role":"assistant","content":"Bonjour"}}
        ]}"#;
        let (outcome, signals) = decode(decode_chat_response, body);

        assert!(outcome.is_ok());
        assert_eq!(signals, vec![Signal::Next("Bonjour".to_string())]);
    }

    #[test]
    fn test_cancelled_emitter_stops_body_collection() {
        let recorder = Recorder::passive();
        let emitter = Emitter::new(recorder.clone());
        emitter.cancel();

        let mut reader = Cursor::new(b"{\"choices\":\n[]}\n".to_vec());
        assert_eq!(
            decode_chat_response(200, &mut reader, &emitter),
            Err(StreamError::Cancelled)
        );
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn test_chat_decoder_rejects_empty_choices() {
        let (outcome, signals) = decode(decode_chat_response, r#"{"choices":[]}"#);
        assert_eq!(
            outcome,
            Err(StreamError::Decode("choices has length 0".to_string()))
        );
        assert!(signals.is_empty());
    }

    #[test]
    fn test_chat_error_friendly_messages() {
        let quota = r#"{"error":{"message":"You exceeded your quota","code":"insufficient_quota"}}"#;
        assert_eq!(
            chat_error(429, quota, "gpt-4o").to_string(),
            "API error 429: API quota exceeded. Check your billing or use a different model"
        );

        let missing = r#"{"error":{"message":"The model does not exist","code":"model_not_found"}}"#;
        assert_eq!(
            chat_error(404, missing, "gpt-x").to_string(),
            "API error 404: Model not found: gpt-x. Please check the model name"
        );

        assert_eq!(
            chat_error(404, "not found", "gpt-4o").to_string(),
            "API error 404: not found"
        );
    }

    #[test]
    fn test_gemini_decoder_reads_first_text_part() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hallo"}]}}]}"#;
        let (outcome, signals) = decode(decode_gemini_response, body);

        assert!(outcome.is_ok());
        assert_eq!(signals, vec![Signal::Next("Hallo".to_string())]);
    }

    #[test]
    fn test_gemini_error_friendly_messages() {
        let paid = r#"{"error":{"code":429,"message":"Quota exceeded, limit: 0","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(gemini_error(429, paid, "gemini-2.5-pro")
            .to_string()
            .contains("requires a paid plan"));

        let denied = r#"{"error":{"code":403,"message":"nope","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(
            gemini_error(403, denied, "m").to_string(),
            "API error 403: Access denied. Check your API key permissions"
        );

        assert_eq!(
            gemini_error(500, "<html>oops</html>", "m").to_string(),
            "API error 500: <html>oops</html>"
        );
    }

    #[test]
    fn test_gemini_request_shape() {
        let body = GeminiRequest {
            contents: vec![
                gemini_turn("user", effective_system_message(None)),
                gemini_turn("model", GEMINI_ACKNOWLEDGEMENT),
                gemini_turn("user", "hi"),
            ],
            generation_config: GenerationConfig {
                max_output_tokens: 10,
                temperature: 1.0,
                top_p: 1.0,
            },
            safety_settings: vec![],
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["contents"][0]["parts"][0]["text"], DEFAULT_SYSTEM_MESSAGE);
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 10);
    }

    #[tokio::test]
    async fn test_missing_api_key_answers_without_network() {
        let settings = ModelSettings::defaults(LanguageModel::ChatGpt);
        let transport = HttpTransport::new(tokio::runtime::Handle::current());
        let client = client_for(settings, transport, false);

        let recorder = Recorder::requesting(1);
        client.submit_prompt("hello", None).subscribe(recorder.clone());
        assert_eq!(
            recorder.signals(),
            vec![Signal::Next(MISSING_API_KEY.to_string()), Signal::Complete]
        );
    }
}
