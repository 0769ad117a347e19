use apitap_core::{build_request_telemetry, decode_body, TapConfig, TelemetryRecord};
use apitap_export::{
    CollectorConfig, CollectorTransport, DispatchConfig, HttpCollector, PendingTelemetry,
    TelemetryDispatcher, TransportError,
};
use apitap_testing::{MockResponse, MockServer, RequestMatcher};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;

async fn request_record(id: &str) -> TelemetryRecord {
    let request = http::Request::builder()
        .method("POST")
        .uri("https://api.example.com/api/v1/orders")
        .header("x-request-id", id)
        .header("content-type", "application/json")
        .body(Bytes::from_static(b"{\"qty\":1}"))
        .unwrap();
    build_request_telemetry(&request, &TapConfig::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn http_collector_posts_json() {
    let collector = MockServer::start().await;
    collector
        .expect(
            RequestMatcher::new()
                .method(Method::POST)
                .path("/ingest")
                .header("content-type", "application/json")
                .json_field("/requestID", "req-1"),
        )
        .respond_with(MockResponse::new().status(StatusCode::NO_CONTENT))
        .once();

    let transport = HttpCollector::new(CollectorConfig::new(collector.url("/ingest"))).unwrap();
    transport.send(&request_record("req-1").await).await.unwrap();

    collector.verify();
}

#[tokio::test]
async fn http_collector_reports_status_and_body() {
    let collector = MockServer::start().await;
    collector
        .expect(RequestMatcher::new().path("/ingest"))
        .respond_with(
            MockResponse::new()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body("collector overloaded"),
        );

    let transport = HttpCollector::new(CollectorConfig::new(collector.url("/ingest"))).unwrap();
    let err = transport
        .send(&request_record("req-2").await)
        .await
        .unwrap_err();

    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "collector overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn http_collector_connection_error() {
    // nothing listens on the discard port of the loopback address
    let transport =
        HttpCollector::new(CollectorConfig::new("http://127.0.0.1:9/ingest").timeout(2)).unwrap();
    let err = transport
        .send(&request_record("req-3").await)
        .await
        .unwrap_err();
    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "collector overloaded");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn http_collector_times_out_on_slow_collector() {
    let collector = MockServer::start().await;
    collector
        .expect(
            RequestMatcher::new()
                .path("/ingest")
                .header_present("content-length")
                .header_absent("transfer-encoding"),
        )
        .respond_with(
            MockResponse::new()
                .status(StatusCode::ACCEPTED)
                .delay(Duration::from_secs(5)),
        );

    let transport =
        HttpCollector::new(CollectorConfig::new(collector.url("/ingest")).timeout(1)).unwrap();
    let err = transport
        .send(&request_record("req-slow").await)
        .await
        .unwrap_err();
    match err {
        TransportError::Http(e) => assert!(e.is_timeout()),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(collector.received_requests().len(), 1);
}

#[tokio::test]
async fn dispatcher_ships_completed_records_to_collector() {
    let collector = MockServer::start().await;
    collector
        .expect(RequestMatcher::new().path("/ingest"))
        .respond_with(MockResponse::new().status(StatusCode::ACCEPTED));

    let config = Arc::new(TapConfig::new().max_response_body_size(4));
    let transport = Arc::new(
        HttpCollector::new(CollectorConfig::new(collector.url("/ingest"))).unwrap(),
    );
    let (dispatcher, supervisor) =
        TelemetryDispatcher::spawn(transport, config, DispatchConfig::default());

    let response = http::Response::builder()
        .status(201)
        .header("content-type", "application/json")
        .body(Bytes::from_static(b"{\"id\":99}"))
        .unwrap();
    dispatcher
        .submit(PendingTelemetry::new(request_record("req-4").await, response))
        .unwrap();

    let stats = supervisor.shutdown(Duration::from_secs(5)).await;
    assert_eq!(stats.sent, 1);

    let received = collector.received_requests();
    assert_eq!(received.len(), 1);
    let payload = received[0].json().unwrap();
    assert_eq!(payload["requestID"], "req-4");
    assert_eq!(payload["response"]["statusCode"], "201");
    assert_eq!(payload["response"]["common"]["truncatedBody"], true);

    let body = payload["response"]["common"]["body"].as_str().unwrap();
    assert_eq!(decode_body(body).unwrap(), b"{\"id");
}
