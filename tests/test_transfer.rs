//! Integration tests for the GET executor and the statistics it feeds.

use cloud_ping::context::ProbeContext;
use cloud_ping::stats::{EventType, Statistics};
use std::time::Duration;

use cloud_ping::transfer::{TransferError, TransferEvents, TransferRequest, Transport};
use reqwest::header::{HeaderValue, RANGE};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records callback names in call order.
#[derive(Default)]
struct EventLog(Vec<&'static str>);

impl TransferEvents for EventLog {
    fn on_send_headers(&mut self) {
        self.0.push("send");
    }

    fn on_recv_header(&mut self, _size: usize) {
        self.0.push("header");
    }

    fn on_recv_data(&mut self, _size: usize) {
        self.0.push("data");
    }

    fn on_failure(&mut self, _error: &TransferError) {
        self.0.push("failure");
    }

    fn on_complete(&mut self, _status: u16) {
        self.0.push("complete");
    }
}

#[tokio::test]
async fn test_successful_get_records_size_and_timing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = ProbeContext::init().unwrap();
    let request = TransferRequest {
        url: format!("{}/file", server.uri()),
        ..Default::default()
    };
    let mut stat = Statistics::new();
    ctx.perform_get(&request, &mut stat).await;

    assert!(stat.is_success());
    assert_eq!(stat.http_code(), 200);
    assert_eq!(stat.data_size(), 4096);
    assert!(stat.failure().is_none());

    let send = stat.event_time(EventType::HeadersSendStart).unwrap();
    let headers = stat.event_time(EventType::HeadersRecvStart).unwrap();
    let data_start = stat.event_time(EventType::DataRecvStart).unwrap();
    let data_end = stat.event_time(EventType::DataRecvEnd).unwrap();
    assert!(send <= headers);
    assert!(headers <= data_start);
    assert!(data_start <= data_end);
    assert!(stat.event_time(EventType::HeadersRecvEnd).is_some());
    assert_eq!(stat.total_time(), data_end.since(&send));
}

#[tokio::test]
async fn test_range_header_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("range", "bytes=0-9"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 10]))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = ProbeContext::init().unwrap();
    let mut request = TransferRequest {
        url: format!("{}/file", server.uri()),
        ..Default::default()
    };
    request.headers.insert(RANGE, HeaderValue::from_static("bytes=0-9"));
    let mut stat = Statistics::new();
    ctx.perform_get(&request, &mut stat).await;

    assert!(stat.is_success());
    assert_eq!(stat.http_code(), 206);
    assert_eq!(stat.data_size(), 10);
}

#[tokio::test]
async fn test_receive_limit_aborts_transfer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024 * 1024]))
        .mount(&server)
        .await;

    let ctx = ProbeContext::init().unwrap();
    let request = TransferRequest {
        url: format!("{}/big", server.uri()),
        recv_limit: Some(10),
        ..Default::default()
    };
    let mut stat = Statistics::new();
    ctx.perform_get(&request, &mut stat).await;

    assert!(!stat.is_success());
    assert_eq!(stat.http_code(), 200);
    assert!(stat.data_size() > 10);
    assert!(stat.data_size() < 1024 * 1024);
    assert!(stat.failure().unwrap().contains("receive limit"));
}

#[tokio::test]
async fn test_error_status_is_not_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .mount(&server)
        .await;

    let ctx = ProbeContext::init().unwrap();
    let request = TransferRequest {
        url: format!("{}/private", server.uri()),
        ..Default::default()
    };
    let mut stat = Statistics::new();
    ctx.perform_get(&request, &mut stat).await;

    assert!(!stat.is_success());
    assert_eq!(stat.http_code(), 403);
    assert_eq!(stat.data_size(), 0);
    assert!(stat.event_time(EventType::HeadersRecvStart).is_some());
}

#[tokio::test]
async fn test_connection_refused_completes_with_zero_status() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let ctx = ProbeContext::init().unwrap();
    let request = TransferRequest {
        url: format!("http://127.0.0.1:{}/file", port),
        ..Default::default()
    };
    let mut stat = Statistics::new();
    ctx.perform_get(&request, &mut stat).await;

    assert!(!stat.is_success());
    assert_eq!(stat.http_code(), 0);
    assert!(stat.failure().is_some());
    assert!(stat.started());
    assert!(stat.event_time(EventType::HeadersRecvStart).is_none());
}

#[tokio::test]
async fn test_send_fires_once_after_connecting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 64]))
        .expect(2)
        .mount(&server)
        .await;

    let transport = Transport::new(reqwest::Client::builder().pool_max_idle_per_host(0)).unwrap();
    let request = TransferRequest {
        url: format!("{}/file", server.uri()),
        ..Default::default()
    };
    assert_eq!(transport.connections(), 0);

    for round in 1..=2 {
        let mut log = EventLog::default();
        transport.perform_get(&request, &mut log).await;

        assert_eq!(transport.connections(), round);
        assert_eq!(log.0.iter().filter(|e| **e == "send").count(), 1);
        assert_eq!(log.0.first(), Some(&"send"));
        assert_eq!(log.0.get(1), Some(&"header"));
        assert_eq!(log.0.last(), Some(&"complete"));
    }
}

#[tokio::test]
async fn test_send_fires_before_failure_when_connect_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = Transport::new(reqwest::Client::builder()).unwrap();
    let request = TransferRequest {
        url: format!("http://127.0.0.1:{}/file", port),
        ..Default::default()
    };
    let mut log = EventLog::default();
    transport.perform_get(&request, &mut log).await;

    assert_eq!(transport.connections(), 0);
    assert_eq!(log.0, vec!["send", "failure", "complete"]);
}

#[tokio::test]
async fn test_bodyless_response_ends_at_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let ctx = ProbeContext::init().unwrap();
    let request = TransferRequest {
        url: format!("{}/empty", server.uri()),
        ..Default::default()
    };
    let mut stat = Statistics::new();
    ctx.perform_get(&request, &mut stat).await;

    assert!(stat.is_success());
    assert_eq!(stat.data_size(), 0);
    assert!(stat.event_time(EventType::DataRecvEnd).is_none());
    assert!(stat.total_time().as_msec() >= 150.0);
}
