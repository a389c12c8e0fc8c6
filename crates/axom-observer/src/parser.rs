//! Provider-specific request/response parsing and operation classification.
//!
//! Bodies are parsed best-effort: anything that is not a JSON object yields
//! the minimal metadata (provider, endpoint, method) and the exchange is
//! still observed. Provider-specific branches cover the schema differences
//! between OpenAI, Anthropic and Google AI; everything else gets the common
//! field extraction only.

use serde_json::{Map, Value};

/// Maximum preview length for prompt and response excerpts, in characters.
pub const PREVIEW_LIMIT: usize = 100;

/// Truncate `s` to `limit` characters, appending `"..."` when truncated.
pub fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        let head: String = s.chars().take(limit).collect();
        format!("{head}...")
    }
}

/// Map a request path to a normalized operation label. First match wins.
pub fn classify_operation(path: &str) -> &'static str {
    if path.contains("/chat/completions") || path.contains("/messages") {
        return "chat_completion";
    }
    if path.contains("/completions") || path.contains("/generate") {
        return "text_completion";
    }
    if path.contains("/embeddings") || path.contains("/embed") {
        return "embedding";
    }
    if path.contains("/images/generations") {
        return "image_generation";
    }
    if path.contains("/audio/transcriptions") {
        return "audio_transcription";
    }
    if path.contains("/audio/translations") {
        return "audio_translation";
    }
    if path.contains("/moderations") {
        return "moderation";
    }
    "ai_request"
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Extract normalized metadata from an AI API request body.
///
/// Always contains `provider`, `endpoint` and `method`; when the body is a
/// JSON object it also carries the model, message list, a truncated
/// `prompt_preview` and the common sampling parameters.
pub fn parse_request(
    provider_name: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert(
        "provider".to_string(),
        Value::String(provider_name.to_string()),
    );
    request.insert("endpoint".to_string(), Value::String(path.to_string()));
    request.insert("method".to_string(), Value::String(method.to_string()));

    if body.is_empty() {
        return request;
    }
    let Ok(Value::Object(json)) = serde_json::from_slice::<Value>(body) else {
        return request;
    };

    if let Some(model) = json.get("model").and_then(Value::as_str) {
        request.insert("model".to_string(), Value::String(model.to_string()));
    }

    if let Some(messages) = json.get("messages").and_then(Value::as_array) {
        request.insert("messages".to_string(), Value::Array(messages.clone()));
        if let Some(content) = messages
            .first()
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
        {
            request.insert(
                "prompt_preview".to_string(),
                Value::String(truncate(content, PREVIEW_LIMIT)),
            );
        }
    }

    for field in [
        "max_tokens",
        "temperature",
        "top_p",
        "frequency_penalty",
        "presence_penalty",
    ] {
        if let Some(v) = json.get(field) {
            request.insert(field.to_string(), v.clone());
        }
    }

    match provider_name {
        "OpenAI" => parse_openai_request(&mut request, &json),
        "Anthropic" => parse_anthropic_request(&mut request, &json),
        "Google AI" => parse_google_request(&mut request, &json),
        _ => {}
    }

    request
}

/// OpenAI-specific request fields.
fn parse_openai_request(request: &mut Map<String, Value>, json: &Map<String, Value>) {
    if let Some(stream) = json.get("stream").and_then(Value::as_bool) {
        request.insert("stream".to_string(), Value::Bool(stream));
    }
    if let Some(n) = json.get("n").and_then(Value::as_f64) {
        request.insert("n".to_string(), Value::from(n as i64));
    }
}

/// Anthropic-specific request fields.
fn parse_anthropic_request(request: &mut Map<String, Value>, json: &Map<String, Value>) {
    if let Some(max_tokens) = json.get("max_tokens").and_then(Value::as_f64) {
        request.insert("max_tokens".to_string(), Value::from(max_tokens as i64));
    }
    if let Some(system) = json.get("system").and_then(Value::as_str) {
        request.insert("system".to_string(), Value::String(system.to_string()));
    }
}

/// Google AI-specific request fields.
fn parse_google_request(request: &mut Map<String, Value>, json: &Map<String, Value>) {
    if let Some(config) = json.get("generationConfig").and_then(Value::as_object) {
        request.insert(
            "generation_config".to_string(),
            Value::Object(config.clone()),
        );
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Extract normalized metadata from an AI API response body.
pub fn parse_response(provider_name: &str, body: &[u8]) -> Map<String, Value> {
    let mut response = Map::new();

    if body.is_empty() {
        return response;
    }
    let Ok(Value::Object(json)) = serde_json::from_slice::<Value>(body) else {
        return response;
    };

    if let Some(usage) = json.get("usage").and_then(Value::as_object) {
        response.insert("usage".to_string(), Value::Object(usage.clone()));
    }

    if let Some(content) = json
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
    {
        response.insert(
            "response_preview".to_string(),
            Value::String(truncate(content, PREVIEW_LIMIT)),
        );
    }

    match provider_name {
        "OpenAI" => parse_openai_response(&mut response, &json),
        "Anthropic" => parse_anthropic_response(&mut response, &json),
        _ => {}
    }

    response
}

/// OpenAI-specific response fields.
fn parse_openai_response(response: &mut Map<String, Value>, json: &Map<String, Value>) {
    if let Some(id) = json.get("id").and_then(Value::as_str) {
        response.insert("id".to_string(), Value::String(id.to_string()));
    }
}

/// Anthropic-specific response fields.
fn parse_anthropic_response(response: &mut Map<String, Value>, json: &Map<String, Value>) {
    if let Some(text) = json
        .get("content")
        .and_then(Value::as_array)
        .and_then(|content| content.first())
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
    {
        response.insert(
            "response_preview".to_string(),
            Value::String(truncate(text, PREVIEW_LIMIT)),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---- Operation classification -------------------------------------------

    #[test]
    fn test_classify_chat_completion() {
        assert_eq!(classify_operation("/v1/chat/completions"), "chat_completion");
        assert_eq!(classify_operation("/v1/messages"), "chat_completion");
    }

    #[test]
    fn test_classify_text_completion() {
        assert_eq!(classify_operation("/v1/completions"), "text_completion");
        assert_eq!(classify_operation("/api/generate"), "text_completion");
    }

    #[test]
    fn test_classify_embedding() {
        assert_eq!(classify_operation("/v1/embeddings"), "embedding");
        assert_eq!(classify_operation("/v1/embed"), "embedding");
    }

    #[test]
    fn test_classify_image_generation() {
        assert_eq!(classify_operation("/v1/images/generations"), "image_generation");
    }

    #[test]
    fn test_classify_audio() {
        assert_eq!(
            classify_operation("/v1/audio/transcriptions"),
            "audio_transcription"
        );
        assert_eq!(
            classify_operation("/v1/audio/translations"),
            "audio_translation"
        );
    }

    #[test]
    fn test_classify_moderation() {
        assert_eq!(classify_operation("/v1/moderations"), "moderation");
    }

    #[test]
    fn test_classify_fallback() {
        assert_eq!(classify_operation("/v1/something-else"), "ai_request");
    }

    #[test]
    fn test_classify_chat_wins_over_completions() {
        // "/chat/completions" also contains "/completions"; order decides.
        assert_eq!(
            classify_operation("/openai/v1/chat/completions"),
            "chat_completion"
        );
    }

    // ---- Truncation ---------------------------------------------------------

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate("hello", 100), "hello");
    }

    #[test]
    fn test_truncate_at_limit_unchanged() {
        let s = "x".repeat(100);
        assert_eq!(truncate(&s, 100), s);
    }

    #[test]
    fn test_truncate_over_limit() {
        let s = "x".repeat(101);
        let out = truncate(&s, 100);
        assert_eq!(out.len(), 103);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let s = "é".repeat(150);
        let out = truncate(&s, 100);
        assert_eq!(out.chars().count(), 103);
    }

    // ---- Request parsing ----------------------------------------------------

    #[test]
    fn test_parse_request_minimal_on_empty_body() {
        let request = parse_request("OpenAI", "POST", "/v1/chat/completions", b"");
        assert_eq!(request["provider"], json!("OpenAI"));
        assert_eq!(request["endpoint"], json!("/v1/chat/completions"));
        assert_eq!(request["method"], json!("POST"));
        assert!(!request.contains_key("model"));
    }

    #[test]
    fn test_parse_request_minimal_on_invalid_json() {
        let request = parse_request("OpenAI", "POST", "/v1/chat/completions", b"not json");
        assert_eq!(request.len(), 3);
    }

    #[test]
    fn test_parse_request_openai_chat() {
        let body = serde_json::to_vec(&json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}],
            "temperature": 0.7,
            "stream": true,
            "n": 2
        }))
        .unwrap();
        let request = parse_request("OpenAI", "POST", "/v1/chat/completions", &body);

        assert_eq!(request["model"], json!("gpt-4"));
        assert_eq!(request["prompt_preview"], json!("Hello"));
        assert_eq!(request["temperature"], json!(0.7));
        assert_eq!(request["stream"], json!(true));
        assert_eq!(request["n"], json!(2));
        assert!(request["n"].is_i64());
        assert_eq!(request["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_request_prompt_preview_truncated() {
        let long = "a".repeat(150);
        let body = serde_json::to_vec(&json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": long}]
        }))
        .unwrap();
        let request = parse_request("OpenAI", "POST", "/v1/chat/completions", &body);

        let preview = request["prompt_preview"].as_str().unwrap();
        assert_eq!(preview.len(), 103);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_parse_request_anthropic() {
        let body = serde_json::to_vec(&json!({
            "model": "claude-3-opus",
            "max_tokens": 1024,
            "system": "You are terse.",
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .unwrap();
        let request = parse_request("Anthropic", "POST", "/v1/messages", &body);

        assert_eq!(request["max_tokens"], json!(1024));
        assert!(request["max_tokens"].is_i64());
        assert_eq!(request["system"], json!("You are terse."));
    }

    #[test]
    fn test_parse_request_google_generation_config() {
        let body = serde_json::to_vec(&json!({
            "generationConfig": {"temperature": 0.2, "maxOutputTokens": 256}
        }))
        .unwrap();
        let request = parse_request("Google AI", "POST", "/v1beta/models/gemini:generateContent", &body);

        assert_eq!(
            request["generation_config"]["maxOutputTokens"],
            json!(256)
        );
        assert!(!request.contains_key("generationConfig"));
    }

    #[test]
    fn test_parse_request_non_string_content_skips_preview() {
        let body = serde_json::to_vec(&json!({
            "messages": [{"role": "user", "content": [{"type": "text", "text": "block"}]}]
        }))
        .unwrap();
        let request = parse_request("Anthropic", "POST", "/v1/messages", &body);
        assert!(!request.contains_key("prompt_preview"));
        assert!(request.contains_key("messages"));
    }

    // ---- Response parsing ---------------------------------------------------

    #[test]
    fn test_parse_response_openai() {
        let body = serde_json::to_vec(&json!({
            "id": "chatcmpl-abc",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 15, "total_tokens": 25}
        }))
        .unwrap();
        let response = parse_response("OpenAI", &body);

        assert_eq!(response["response_preview"], json!("Hi there"));
        assert_eq!(response["id"], json!("chatcmpl-abc"));
        assert_eq!(response["usage"]["total_tokens"], json!(25));
    }

    #[test]
    fn test_parse_response_anthropic_content_block() {
        let body = serde_json::to_vec(&json!({
            "content": [{"type": "text", "text": "ok"}],
            "usage": {"input_tokens": 3, "output_tokens": 1}
        }))
        .unwrap();
        let response = parse_response("Anthropic", &body);

        assert_eq!(response["response_preview"], json!("ok"));
        assert_eq!(response["usage"]["input_tokens"], json!(3));
    }

    #[test]
    fn test_parse_response_empty_choices() {
        let body = serde_json::to_vec(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 5}
        }))
        .unwrap();
        let response = parse_response("OpenAI", &body);

        assert!(!response.contains_key("response_preview"));
        assert_eq!(response["usage"]["prompt_tokens"], json!(5));
    }

    #[test]
    fn test_parse_response_invalid_json() {
        assert!(parse_response("OpenAI", b"not json").is_empty());
        assert!(parse_response("Anthropic", b"").is_empty());
    }

    #[test]
    fn test_parse_response_long_preview_truncated() {
        let long = "b".repeat(200);
        let body = serde_json::to_vec(&json!({
            "choices": [{"message": {"content": long}}]
        }))
        .unwrap();
        let response = parse_response("OpenAI", &body);
        let preview = response["response_preview"].as_str().unwrap();
        assert_eq!(preview.len(), 103);
    }
}
