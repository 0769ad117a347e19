//! End-to-end behaviour of the core engine through its public API.

use apitap_core::{
    attach_response_telemetry, build_request_telemetry, decode_body, HttpClassifier,
    RawTapConfig, StatusCodePattern, TapConfig,
};
use bytes::Bytes;
use http::{Request, Response};
use std::sync::Arc;

fn raw_config() -> RawTapConfig {
    RawTapConfig {
        excluded_http_methods: Some("OPTIONS,HEAD".to_string()),
        excluded_headers: Some("upgrade".to_string()),
        excluded_status_codes: Some("1xx,3xx,5xx".to_string()),
        max_request_body_size: Some(8),
        max_response_body_size: Some(16),
        namespace: Some("tenant-a".to_string()),
        telemetry_endpoint: Some("http://collector.local/ingest".to_string()),
        correlation_header: None,
        source_ip_header: None,
    }
}

#[test]
fn parse_status_code_pattern_ranges() {
    assert_eq!(
        StatusCodePattern::parse("4xx"),
        StatusCodePattern { low: 400, high: 499 }
    );
    assert_eq!(StatusCodePattern::parse("nope"), StatusCodePattern::NONE);
}

#[test]
fn websocket_upgrade_is_never_api() {
    let config = Arc::new(TapConfig::from_raw(raw_config()).unwrap());
    let classifier = HttpClassifier::new(config);

    let request = Request::builder()
        .uri("https://api.example.com/api/v1/stream")
        .header("upgrade", "websocket")
        .body(())
        .unwrap();
    assert!(!classifier.is_api_request(&request));
}

#[tokio::test]
async fn accepted_transaction_produces_complete_record() {
    let config = Arc::new(TapConfig::from_raw(raw_config()).unwrap());
    let classifier = HttpClassifier::new(config.clone());

    let request = Request::builder()
        .method("POST")
        .uri("https://api.example.com/api/v1/orders")
        .header("content-type", "application/json")
        .header("x-request-id", "abc-123")
        .body(Bytes::from_static(b"{\"sku\":\"A-1\",\"qty\":3}"))
        .unwrap();
    assert!(classifier.is_api_request(&request));

    let mut record = build_request_telemetry(&request, &config).await.unwrap();
    assert!(record.request.common.truncated_body);
    assert_eq!(
        decode_body(record.request.common.body.as_deref().unwrap()).unwrap(),
        b"{\"sku\":\""
    );

    let response = Response::builder()
        .status(200)
        .header("content-type", "application/json")
        .body(Bytes::from_static(b"{\"ok\":true}"))
        .unwrap();
    assert!(classifier.is_api_response(&response));

    attach_response_telemetry(&mut record, &response, &config)
        .await
        .unwrap();
    let snapshot = record.response.as_ref().unwrap();
    assert!(!snapshot.common.truncated_body);
    assert_eq!(
        decode_body(snapshot.common.body.as_deref().unwrap()).unwrap(),
        b"{\"ok\":true}"
    );

    let json: serde_json::Value = serde_json::from_slice(&record.to_json().unwrap()).unwrap();
    assert_eq!(json["requestID"], "abc-123");
    assert_eq!(json["destinationAddress"], "api.example.com:443");
    assert_eq!(json["destinationNamespace"], "tenant-a");
    assert_eq!(json["response"]["statusCode"], "200");
}

#[test]
fn excluded_server_errors_are_not_api_responses() {
    let config = Arc::new(TapConfig::from_raw(raw_config()).unwrap());
    let classifier = HttpClassifier::new(config);

    let response = Response::builder()
        .status(503)
        .header("content-type", "application/json")
        .body(())
        .unwrap();
    assert!(!classifier.is_api_response(&response));
}
