//! Functional tests for the HTTP endpoints

#[path = "../common/mod.rs"]
mod common;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use common::{
    body_json, multipart_body, png_bytes, png_data_url, test_app, test_settings, FakeModel, Recorder,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use vlm_serving::inference::CaptionLength;

const BOUNDARY: &str = "vlm-test-boundary";

fn create_test_app() -> (Router, Recorder) {
    let recorder = Recorder::default();
    let app = test_app(test_settings(), FakeModel::new(recorder.clone()));
    (app, recorder)
}

fn json_request(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(BOUNDARY, parts)))
        .unwrap()
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(json_request(uri, body.to_string()))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_health_reports_configuration() {
    let mut settings = test_settings();
    settings.preprocess.workers = 3;
    let app = test_app(settings, FakeModel::new(Recorder::default()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "status": "ok",
            "model": "fake-moondream",
            "api_key_enabled": false,
            "optimization": {
                "preprocess_workers": 3,
                "batch_enabled": false,
                "batch_size": null
            }
        })
    );
}

#[tokio::test]
async fn test_health_reports_batch_size_when_enabled() {
    let mut settings = test_settings();
    settings.batch.enabled = true;
    settings.batch.size = 8;
    let app = test_app(settings, FakeModel::new(Recorder::default()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["optimization"]["batch_enabled"], json!(true));
    assert_eq!(body["optimization"]["batch_size"], json!(8));
}

#[tokio::test]
async fn test_index_serves_upload_page() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("<html"));
}

#[tokio::test]
async fn test_caption_returns_caption_and_metrics() {
    let (app, recorder) = create_test_app();

    let (status, body) = post_json(
        app,
        "/v1/caption",
        json!({ "image_url": png_data_url(4, 3), "length": "short" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["caption"], json!("A short caption of a small image"));
    assert_eq!(body["finish_reason"], json!("stop"));

    let metrics = &body["metrics"];
    assert_eq!(metrics["input_tokens"], json!(735));
    assert_eq!(metrics["output_tokens"], json!(7));
    assert_eq!(metrics["prefill_time_ms"], json!(0.0));
    assert!(metrics["decode_time_ms"].as_f64().unwrap() >= 0.0);
    assert_eq!(metrics["ttft_ms"], metrics["decode_time_ms"]);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, "caption");
    assert_eq!(calls[0].dimensions, (4, 3));
}

#[tokio::test]
async fn test_caption_length_is_clamped() {
    let cases = [
        (json!("short"), CaptionLength::Short),
        (json!("long"), CaptionLength::Long),
        (json!("normal"), CaptionLength::Normal),
        (json!("extra-long"), CaptionLength::Normal),
        (json!("SHORT"), CaptionLength::Normal),
        (json!(42), CaptionLength::Normal),
    ];

    for (length, expected) in cases {
        let (app, recorder) = create_test_app();
        let (status, _) = post_json(
            app,
            "/v1/caption",
            json!({ "image_url": png_data_url(2, 2), "length": length.clone() }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(recorder.calls()[0].length, Some(expected), "length {}", length);
    }
}

#[tokio::test]
async fn test_caption_length_defaults_to_normal() {
    let (app, recorder) = create_test_app();

    let (status, _) = post_json(
        app,
        "/v1/caption",
        json!({ "image_url": png_data_url(2, 2), "stream": true }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(recorder.calls()[0].length, Some(CaptionLength::Normal));
}

#[tokio::test]
async fn test_caption_missing_image_url() {
    let (app, recorder) = create_test_app();

    let (status, body) = post_json(app, "/v1/caption", json!({ "length": "short" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing image_url parameter" }));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_json_body() {
    for body in ["not json", "{}", "null", "[1, 2]", ""] {
        let (app, recorder) = create_test_app();

        let response = app.oneshot(json_request("/v1/query", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Invalid JSON body" })
        );
        assert!(recorder.calls().is_empty());
    }
}

#[tokio::test]
async fn test_invalid_data_url_is_rejected() {
    let (app, recorder) = create_test_app();

    let (status, body) = post_json(
        app,
        "/v1/caption",
        json!({ "image_url": "https://example.com/cat.png" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("Invalid image_url format. Expected data URL format: data:image/<type>;base64,<data>")
    );
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_undecodable_image_is_rejected() {
    let (app, recorder) = create_test_app();

    let (status, body) = post_json(
        app,
        "/v1/query",
        json!({
            "image_url": "data:image/png;base64,aGVsbG8gd29ybGQ=",
            "question": "What is this?"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Failed to decode image"));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_query_returns_answer_and_request_id() {
    let (app, recorder) = create_test_app();

    let (status, body) = post_json(
        app,
        "/v1/query",
        json!({ "image_url": png_data_url(2, 2), "question": "What color is it?" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], json!("You asked: What color is it?"));

    let request_id = body["request_id"].as_str().unwrap();
    let (timestamp, suffix) = request_id
        .strip_prefix("query_")
        .unwrap()
        .rsplit_once('-')
        .unwrap();
    assert!(chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d-%H:%M:%S").is_ok());
    assert_eq!(suffix.len(), 6);

    let calls = recorder.calls();
    assert_eq!(calls[0].kind, "query");
    assert_eq!(calls[0].question.as_deref(), Some("What color is it?"));
}

#[tokio::test]
async fn test_query_missing_question() {
    for body in [
        json!({ "image_url": png_data_url(2, 2) }),
        json!({ "image_url": png_data_url(2, 2), "question": "" }),
    ] {
        let (app, recorder) = create_test_app();

        let (status, body) = post_json(app, "/v1/query", body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Missing question parameter" }));
        assert!(recorder.calls().is_empty());
    }
}

#[tokio::test]
async fn test_model_failure_returns_500() {
    let recorder = Recorder::default();
    let app = test_app(test_settings(), FakeModel::new(recorder.clone()).failing("CUDA out of memory"));

    let (status, body) = post_json(
        app,
        "/v1/caption",
        json!({ "image_url": png_data_url(2, 2) }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "CUDA out of memory" }));
    assert_eq!(recorder.calls().len(), 1);
}

#[tokio::test]
async fn test_gate_recovers_after_model_failure() {
    let recorder = Recorder::default();
    let state = common::test_state(
        test_settings(),
        FakeModel::new(recorder.clone()).failing("boom"),
    );
    let app = vlm_serving::api::create_router(state.clone());

    for _ in 0..2 {
        let (status, _) = post_json(
            app.clone(),
            "/v1/caption",
            json!({ "image_url": png_data_url(2, 2) }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    assert_eq!(recorder.calls().len(), 2);
    assert_eq!(state.service.gate().failed_count(), 2);
}

#[tokio::test]
async fn test_identify_upload() {
    let (app, recorder) = create_test_app();
    let image = png_bytes(5, 5);

    let response = app
        .oneshot(multipart_request(
            "/identify",
            &[
                ("file", Some("cat.png"), &image[..]),
                ("question", None, &b"Is there a cat?"[..]),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["question"], json!("Is there a cat?"));
    assert_eq!(body["answer"], json!("You asked: Is there a cat?"));
    assert!(body["inference_time"].as_str().unwrap().ends_with('s'));
    assert_eq!(recorder.calls()[0].dimensions, (5, 5));
}

#[tokio::test]
async fn test_identify_uses_default_question() {
    let (app, recorder) = create_test_app();
    let image = png_bytes(2, 2);

    let response = app
        .oneshot(multipart_request("/identify", &[("file", Some("cat.png"), &image[..])]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        recorder.calls()[0].question.as_deref(),
        Some("What's in this image?")
    );
}

#[tokio::test]
async fn test_caption_upload() {
    let (app, recorder) = create_test_app();
    let image = png_bytes(2, 2);

    let response = app
        .oneshot(multipart_request(
            "/caption",
            &[("file", Some("cat.png"), &image[..]), ("length", None, &b"long"[..])],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["caption"], json!("A long caption of a small image"));
    assert_eq!(body["length"], json!("long"));
    assert_eq!(recorder.calls()[0].length, Some(CaptionLength::Long));
}

#[tokio::test]
async fn test_upload_without_file() {
    let (app, recorder) = create_test_app();

    let response = app
        .oneshot(multipart_request("/identify", &[("question", None, &b"Hello?"[..])]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "error": "No file provided" }));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_upload_with_corrupt_image() {
    let (app, recorder) = create_test_app();

    let response = app
        .oneshot(multipart_request(
            "/caption",
            &[("file", Some("notes.txt"), &b"definitely not an image"[..])],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_service_dispatches_inference_requests() {
    use vlm_serving::inference::InferenceRequest;
    use vlm_serving::orchestrator::InferenceOutcome;
    use vlm_serving::preprocess::ImagePayload;

    let recorder = Recorder::default();
    let state = common::test_state(test_settings(), FakeModel::new(recorder.clone()));

    let outcome = state
        .service
        .run(
            ImagePayload::Bytes(png_bytes(2, 2)),
            InferenceRequest::Caption {
                length: CaptionLength::Short,
            },
        )
        .await
        .unwrap();
    match outcome {
        InferenceOutcome::Caption(caption) => assert_eq!(caption.length, CaptionLength::Short),
        other => panic!("unexpected outcome {:?}", other),
    }

    let outcome = state
        .service
        .run(
            ImagePayload::DataUrl(png_data_url(2, 2)),
            InferenceRequest::Query {
                question: "How many?".to_string(),
            },
        )
        .await
        .unwrap();
    match outcome {
        InferenceOutcome::Query(query) => assert_eq!(query.answer, "You asked: How many?"),
        other => panic!("unexpected outcome {:?}", other),
    }

    let stats = state.service.pool().stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.pending, 0);
    assert_eq!(recorder.calls().len(), 2);
}

#[tokio::test]
async fn test_oversized_body_returns_json_413() {
    let mut settings = test_settings();
    settings.server.max_body_bytes = 1024;
    let recorder = Recorder::default();
    let app = test_app(settings, FakeModel::new(recorder.clone()));

    let body = json!({ "image_url": format!("data:image/png;base64,{}", "A".repeat(4096)) });
    let response = app
        .oneshot(json_request("/v1/caption", body.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
    assert_eq!(content_type, "application/json");
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("length limit exceeded"));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_returns_json_413() {
    let mut settings = test_settings();
    settings.server.max_body_bytes = 1024;
    let app = test_app(settings, FakeModel::new(Recorder::default()));
    let file = vec![0u8; 4096];

    let response = app
        .oneshot(multipart_request("/caption", &[("file", Some("big.png"), &file[..])]))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
    assert_eq!(content_type, "application/json");
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_multipart_without_boundary_returns_json_400() {
    for uri in ["/caption", "/identify"] {
        let (app, recorder) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(CONTENT_TYPE, "multipart/form-data")
                    .body(Body::from("no boundary here"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {}", uri);
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
        assert_eq!(content_type, "application/json");
        assert!(body_json(response).await["error"].is_string());
        assert!(recorder.calls().is_empty());
    }
}
