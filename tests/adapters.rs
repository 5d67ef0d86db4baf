use replygate::llm::gemini::GeminiAdapter;
use replygate::llm::openai::OpenAiAdapter;
use replygate::llm::provider::{
    CallOptions, ChatMessage, LlmAdapter, PromptPayload, Provider, ProviderError,
    ProviderSettings, build_adapter,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OPTIONS: CallOptions = CallOptions {
    temperature: 0.0,
    max_tokens: 120,
};

fn settings(server: &MockServer) -> ProviderSettings {
    let mut settings = ProviderSettings::new("test-key");
    settings.base_url = Some(server.uri());
    settings.retry_delay_ms = 1;
    settings
}

#[tokio::test]
async fn openai_sends_role_tagged_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "persona"},
                {"role": "user", "content": "hi"}
            ],
            "temperature": 0.0,
            "max_tokens": 120
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(settings(&server));
    let payload = PromptPayload::Messages(vec![
        ChatMessage::system("persona"),
        ChatMessage::user("hi"),
    ]);

    let completion = adapter.call(payload, "gpt-4o-mini", OPTIONS).await.unwrap();
    assert_eq!(completion, "hello there");
}

#[tokio::test]
async fn openai_missing_content_is_empty_string() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(settings(&server));
    let completion = adapter
        .call(PromptPayload::Flattened("hi".into()), "gpt-4o-mini", OPTIONS)
        .await
        .unwrap();
    assert_eq!(completion, "");
}

#[tokio::test]
async fn openai_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(&server);
    settings.retries = 3;
    let adapter = OpenAiAdapter::new(settings);

    let err = adapter
        .call(PromptPayload::Flattened("hi".into()), "gpt-4o-mini", OPTIONS)
        .await
        .unwrap_err();
    match err {
        ProviderError::Api { status, body, .. } => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(body, "bad key");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried_until_budget_runs_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut settings = settings(&server);
    settings.retries = 2;
    let adapter = GeminiAdapter::new(settings);

    let err = adapter
        .call(PromptPayload::Flattened("hi".into()), "gemini-2.5-flash", OPTIONS)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("gemini API error 503"));
}

#[tokio::test]
async fn gemini_flattens_messages_into_one_user_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "persona\nhi"}]}],
            "generationConfig": {"maxOutputTokens": 120}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"score\":0.9}"}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = build_adapter(Provider::Gemini, settings(&server));
    let payload = PromptPayload::Messages(vec![
        ChatMessage::system("persona"),
        ChatMessage::user("hi"),
    ]);

    let completion = adapter
        .call(payload, "models/gemini-2.5-flash", OPTIONS)
        .await
        .unwrap();
    assert_eq!(completion, "{\"score\":0.9}");
}

#[tokio::test]
async fn gemini_without_candidates_is_empty_string() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(settings(&server));
    let completion = adapter
        .call(PromptPayload::Flattened("hi".into()), "gemini-2.5-flash", OPTIONS)
        .await
        .unwrap();
    assert_eq!(completion, "");
}

#[test]
fn missing_api_key_is_reported_per_provider() {
    // SAFETY: this test binary does not read these variables from other threads.
    unsafe {
        std::env::remove_var("OPENAI_API_KEY");
    }
    let err = OpenAiAdapter::from_env().unwrap_err();
    assert_eq!(err.to_string(), "OPENAI_API_KEY is not set in the environment");
}
