//! HttpTransport and HttpProbe against a wiremock server.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tether_client::http::ERROR_BODY_LIMIT;
use tether_client::{
    HttpProbe, HttpTransport, LivenessProbe, PersistentStream, Policy, RequestOptions, Transport,
    TransportError,
};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn read_body(transport: &HttpTransport, request: &RequestOptions) -> Result<String, TransportError> {
    let response = transport.issue(request, CancellationToken::new()).await?;
    let chunks: Vec<_> = response.body.collect().await;
    let mut body = Vec::new();
    for chunk in chunks {
        body.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn streams_the_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string("line one\nline two\n"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get("/stream").with_base_url(server.uri());

    let response = transport.issue(&request, CancellationToken::new()).await.unwrap();
    assert_eq!(response.meta.status, 200);
    assert_eq!(response.meta.url, format!("{}/stream", server.uri()));
    assert!(response.meta.header("Content-Length").is_some());

    assert_eq!(read_body(&transport, &request).await.unwrap(), "line one\nline two\n");
}

#[tokio::test]
async fn sends_query_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/feed"))
        .and(query_param("since", "42"))
        .and(header("x-token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get(format!("{}/feed", server.uri()))
        .with_method("POST")
        .with_header("x-token", "abc")
        .with_param("since", Some("42"))
        .with_param("ignored", None::<String>);

    assert_eq!(read_body(&transport, &request).await.unwrap(), "ok");
}

#[tokio::test]
async fn non_success_status_is_a_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get(format!("{}/stream", server.uri()));
    let err = transport.issue(&request, CancellationToken::new()).await.unwrap_err();

    assert_eq!(
        err,
        TransportError::Server {
            status: 503,
            body: "busy".into()
        }
    );
    assert_eq!(err.kind(), "server-error");
}

#[tokio::test]
async fn large_error_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(ERROR_BODY_LIMIT * 4)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get(format!("{}/stream", server.uri()));
    let err = timeout(TIMEOUT, transport.issue(&request, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();

    match err {
        TransportError::Server { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body.len(), ERROR_BODY_LIMIT);
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get(format!("http://{addr}/stream"));
    let err = transport.issue(&request, CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), "connecting-error");
}

#[tokio::test]
async fn slow_headers_hit_the_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get(format!("{}/stream", server.uri()))
        .with_timeout(Duration::from_millis(100));
    let err = transport.issue(&request, CancellationToken::new()).await.unwrap_err();
    assert_eq!(err, TransportError::Timeout(Duration::from_millis(100)));
}

#[tokio::test]
async fn cancelled_request_returns_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = RequestOptions::get(format!("{}/stream", server.uri()));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = timeout(TIMEOUT, transport.issue(&request, cancel)).await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn http_probe_follows_status() {
    let server = MockServer::start().await;
    Mock::given(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    assert!(transport.probe_for(format!("{}/health", server.uri())).check().await.is_ok());

    let down = HttpProbe::new(format!("{}/down", server.uri()))
        .unwrap()
        .with_timeout(Duration::from_secs(1));
    let err = down.check().await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn persistent_stream_reconnects_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string("data: 1\n\n"))
        .mount(&server)
        .await;

    let transport = Arc::new(HttpTransport::new().unwrap());
    let policy = Policy::default()
        .with_reconnect_on_close(true)
        .with_wait_before_reconnect(Duration::from_millis(20));
    let stream = PersistentStream::builder(transport, RequestOptions::get(format!("{}/events", server.uri())))
        .policy(policy)
        .build()
        .unwrap();
    let mut rx = stream.subscribe();
    let mut data = stream.take_data().unwrap();

    stream.connect();
    let mut names = Vec::new();
    while names.iter().filter(|n| **n == "response").count() < 2 {
        let event = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        names.push(event.name());
    }
    assert_eq!(
        names,
        [
            "connecting",
            "response",
            "close",
            "reconnecting",
            "reconnect",
            "connecting",
            "response"
        ]
    );

    let chunk = timeout(TIMEOUT, data.next()).await.unwrap().unwrap();
    assert_eq!(chunk.attempt, 1);
    assert_eq!(&chunk.bytes[..], b"data: 1\n\n");

    stream.destroy();
    assert!(server.received_requests().await.unwrap().len() >= 2);
}
