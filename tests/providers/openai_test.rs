//! OpenAI-compatible wire format tests.

use serde_json::json;

use quorum::error::ErrorCategory;
use quorum::providers::openai::{build_request, parse_response};
use quorum::registry::GenerationParams;

fn params() -> GenerationParams {
    GenerationParams {
        temperature: Some(0.2),
        top_p: Some(0.9),
        max_tokens: Some(512),
        presence_penalty: None,
        frequency_penalty: None,
    }
}

#[test]
fn build_request_sets_model_prompt_and_parameters() {
    let req = build_request("gpt-4o", "Hello", &params());
    let body = serde_json::to_value(&req).expect("request serializes");

    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "Hello");
    assert_eq!(body["temperature"], 0.2);
    assert_eq!(body["top_p"], 0.9);
    assert_eq!(body["max_tokens"], 512);
}

#[test]
fn build_request_omits_unset_parameters() {
    let req = build_request("gpt-4o", "Hello", &GenerationParams::default());
    let body = serde_json::to_value(&req).expect("request serializes");
    let object = body.as_object().expect("request is an object");

    assert!(!object.contains_key("temperature"));
    assert!(!object.contains_key("top_p"));
    assert!(!object.contains_key("max_tokens"));
    assert!(!object.contains_key("presence_penalty"));
    assert!(!object.contains_key("frequency_penalty"));
}

#[test]
fn parse_response_extracts_content_and_usage() {
    let body = json!({
        "choices": [{
            "message": {"role": "assistant", "content": "Hello there"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
    .to_string();

    let result = parse_response("openai", &body).expect("valid response");
    assert_eq!(result.content, "Hello there");
    assert_eq!(result.finish_reason, "stop");
    assert_eq!(result.token_count, 5);
    assert!(!result.truncated);
    assert!(result.safety_info.is_empty());
}

#[test]
fn parse_response_marks_length_cutoffs_truncated() {
    let body = json!({
        "choices": [{
            "message": {"role": "assistant", "content": "partial"},
            "finish_reason": "length"
        }]
    })
    .to_string();

    let result = parse_response("openai", &body).expect("valid response");
    assert!(result.truncated);
    assert_eq!(result.finish_reason, "length");
    assert_eq!(result.token_count, 0, "missing usage defaults to zero");
}

#[test]
fn parse_response_rejects_missing_choices() {
    let err = parse_response("openai", r#"{"choices": []}"#)
        .expect_err("no first choice");
    assert_eq!(err.category, ErrorCategory::Server);
}

#[test]
fn parse_response_rejects_non_json_bodies() {
    let err = parse_response("openrouter", "<html>bad gateway</html>")
        .expect_err("not JSON");
    assert_eq!(err.category, ErrorCategory::Server);
    assert_eq!(err.provider, "openrouter");
}

#[test]
fn parse_response_tolerates_null_content() {
    let body = json!({
        "choices": [{
            "message": {"role": "assistant", "content": null},
            "finish_reason": "stop"
        }]
    })
    .to_string();

    let result = parse_response("openai", &body).expect("valid response");
    assert_eq!(result.content, "");
}
