#![allow(clippy::unwrap_used)]

// Integration tests for `HttpTransport` using wiremock.

use futures_util::StreamExt;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use livefeed_api::{Error, FrameParser, HttpTransport, StreamRequest, Transport};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpTransport) {
    let server = MockServer::start().await;
    let transport = HttpTransport::from_reqwest(reqwest::Client::new());
    (server, transport)
}

fn request(server: &MockServer, key: &str, last_event_id: Option<&str>) -> StreamRequest {
    StreamRequest {
        url: Url::parse(&format!("{}/machines/{key}/events", server.uri())).unwrap(),
        token: SecretString::from("tok-123".to_string()),
        last_event_id: last_event_id.map(String::from),
    }
}

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn read_all(mut stream: livefeed_api::ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_stream_sends_bearer_and_accept_headers() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/machines/press-01/events"))
        .and(header("authorization", "Bearer tok-123"))
        .and(header("accept", "text/event-stream"))
        .and(header("cache-control", "no-cache"))
        .respond_with(event_stream("event: status\ndata: up\n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let stream = transport
        .open_stream(request(&server, "press-01", None), &cancel)
        .await
        .unwrap();

    let body = read_all(stream).await;
    let frames = FrameParser::new().feed(&body);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "status");
    assert_eq!(frames[0].data, "up");
}

#[tokio::test]
async fn test_last_event_id_is_replayed() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/machines/lathe/events"))
        .and(header("last-event-id", "41"))
        .respond_with(event_stream("id: 42\ndata: next\n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let stream = transport
        .open_stream(request(&server, "lathe", Some("41")), &cancel)
        .await
        .unwrap();
    assert!(!read_all(stream).await.is_empty());
}

// ── Failure classification ──────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_is_auth_rejected() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let result = transport
        .open_stream(request(&server, "m1", None), &cancel)
        .await;

    match result {
        Err(Error::AuthRejected { status }) => assert_eq!(status, 401),
        Err(other) => panic!("expected AuthRejected, got {other:?}"),
        Ok(_) => panic!("expected AuthRejected, got a stream"),
    }
}

#[tokio::test]
async fn test_forbidden_is_auth_rejected() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let err = transport
        .open_stream(request(&server, "m1", None), &cancel)
        .await
        .err()
        .unwrap();
    assert!(err.is_auth_rejected());
}

#[tokio::test]
async fn test_server_error_is_transient_status() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let err = transport
        .open_stream(request(&server, "m1", None), &cancel)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, Error::Status { status: 503 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let transport = HttpTransport::from_reqwest(reqwest::Client::new());
    let req = StreamRequest {
        // Port 9 (discard) is essentially never listening on loopback.
        url: Url::parse("http://127.0.0.1:9/events").unwrap(),
        token: SecretString::from("t".to_string()),
        last_event_id: None,
    };

    let cancel = CancellationToken::new();
    let err = transport.open_stream(req, &cancel).await.err().unwrap();
    assert!(matches!(err, Error::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_cancelled_before_response() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .respond_with(event_stream("data: x\n\n").set_delay(std::time::Duration::from_secs(30)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transport
        .open_stream(request(&server, "m1", None), &cancel)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Cancelled));
}
