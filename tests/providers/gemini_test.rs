//! Gemini wire format and safety-mapping tests.

use serde_json::json;

use quorum::error::ErrorCategory;
use quorum::providers::gemini::{build_request, parse_response};
use quorum::registry::GenerationParams;

#[test]
fn build_request_maps_parameters_to_generation_config() {
    let params = GenerationParams {
        temperature: Some(0.5),
        top_p: Some(0.8),
        max_tokens: Some(256),
        presence_penalty: None,
        frequency_penalty: None,
    };
    let body = build_request("Hello", &params);

    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "Hello");
    assert_eq!(body["generationConfig"]["temperature"], 0.5);
    assert_eq!(body["generationConfig"]["topP"], 0.8);
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
}

#[test]
fn build_request_omits_empty_generation_config() {
    let body = build_request("Hello", &GenerationParams::default());
    assert!(body.get("generationConfig").is_none());
}

#[test]
fn parse_response_joins_candidate_parts() {
    let body = json!({
        "candidates": [{
            "content": {"parts": [{"text": "Hello "}, {"text": "there"}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"candidatesTokenCount": 12}
    })
    .to_string();

    let result = parse_response(&body).expect("valid response");
    assert_eq!(result.content, "Hello there");
    assert_eq!(result.finish_reason, "STOP");
    assert_eq!(result.token_count, 12);
    assert!(!result.truncated);
}

#[test]
fn parse_response_marks_max_tokens_truncated() {
    let body = json!({
        "candidates": [{
            "content": {"parts": [{"text": "partial"}]},
            "finishReason": "MAX_TOKENS"
        }]
    })
    .to_string();

    let result = parse_response(&body).expect("valid response");
    assert!(result.truncated);
    assert_eq!(result.finish_reason, "MAX_TOKENS");
}

#[test]
fn parse_response_maps_blocked_safety_ratings() {
    let body = json!({
        "candidates": [{
            "finishReason": "SAFETY",
            "safetyRatings": [
                {"category": "HARM_CATEGORY_DANGEROUS", "blocked": true},
                {"category": "HARM_CATEGORY_HARASSMENT", "blocked": false}
            ]
        }]
    })
    .to_string();

    let result = parse_response(&body).expect("valid response");
    assert_eq!(result.safety_info.len(), 2);
    assert!(result.safety_info[0].blocked);
    assert_eq!(result.safety_info[0].category, "HARM_CATEGORY_DANGEROUS");
    assert!(!result.safety_info[1].blocked);
    assert!(result.content.is_empty());
}

#[test]
fn parse_response_maps_prompt_level_blocks() {
    let body = json!({
        "promptFeedback": {"blockReason": "SAFETY"},
        "candidates": []
    })
    .to_string();

    let result = parse_response(&body).expect("valid response");
    assert_eq!(result.safety_info.len(), 1);
    assert!(result.safety_info[0].blocked);
    assert_eq!(result.safety_info[0].category, "SAFETY");
}

#[test]
fn parse_response_rejects_non_json_bodies() {
    let err = parse_response("oops").expect_err("not JSON");
    assert_eq!(err.category, ErrorCategory::Server);
}
