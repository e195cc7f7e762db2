//! HTTP transport against a canned one-shot server.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use uuid::Uuid;

use dapi::cluster::NodeInfo;
use dapi::rbac::PermissionSet;
use dapi::transport::{HttpTransport, RemoteCall, RemoteTransport, TransportError};
use dapi::types::{Arguments, NodeOutcome, NodeStatus, OperationOutput};

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.expect("read");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end.saturating_add(4).saturating_add(body_len) {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve one request with `status` and `body`; the handle yields the raw request.
async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("write");
        let _ = stream.shutdown().await;
        request
    });
    (format!("http://{addr}"), handle)
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(2)).expect("client")
}

fn ping_call() -> RemoteCall {
    let mut arguments = Arguments::new();
    arguments.insert("nodes_list".to_owned(), json!(["worker1"]));
    RemoteCall {
        request_id: Uuid::new_v4(),
        origin: "master".to_owned(),
        operation_id: "cluster.ping".to_owned(),
        arguments,
        caller_permissions: PermissionSet::parse(["cluster:read"]).expect("parse"),
        synchronous: true,
    }
}

#[tokio::test]
async fn call_posts_json_and_attributes_outcome_to_addressed_node() {
    let reply = NodeOutcome::ok(
        "somebody-else",
        OperationOutput::affected(vec![json!({"name": "worker1"})]),
    );
    let (base, server) = serve_once("200 OK", serde_json::to_string(&reply).expect("json")).await;
    let node = NodeInfo::new("worker1").with_address(base);

    let outcome = transport().call(&node, ping_call()).await.expect("outcome");
    assert_eq!(outcome.node, "worker1");
    assert_eq!(outcome.status, NodeStatus::Ok);
    assert_eq!(outcome.output.affected_items, vec![json!({"name": "worker1"})]);

    let request = server.await.expect("server task");
    assert!(request.starts_with("POST /dapi/v1/call HTTP/1.1"), "{request}");
    assert!(request.contains(r#""operation_id":"cluster.ping""#));
    assert!(request.contains(r#""caller_permissions":["cluster:read"]"#));
}

#[tokio::test]
async fn error_status_is_protocol_error() {
    let (base, _server) =
        serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#.to_owned()).await;
    let node = NodeInfo::new("worker1").with_address(base);
    let err = transport().call(&node, ping_call()).await.expect_err("500");
    match err {
        TransportError::Protocol { node, reason } => {
            assert_eq!(node, "worker1");
            assert!(reason.contains("500"), "{reason}");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_body_is_protocol_error() {
    let (base, _server) = serve_once("200 OK", "not json".to_owned()).await;
    let node = NodeInfo::new("worker1").with_address(base);
    let err = transport().call(&node, ping_call()).await.expect_err("garbage");
    assert!(matches!(err, TransportError::Protocol { .. }));
}

#[tokio::test]
async fn refused_connection_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let node = NodeInfo::new("worker1").with_address(format!("http://{addr}"));
    let err = transport().call(&node, ping_call()).await.expect_err("refused");
    assert!(matches!(err, TransportError::Connect { .. }));
}

#[tokio::test]
async fn node_without_address_is_rejected_before_sending() {
    let err = transport()
        .call(&NodeInfo::new("worker1"), ping_call())
        .await
        .expect_err("no address");
    assert_eq!(err, TransportError::NoAddress("worker1".to_owned()));
}

#[tokio::test]
async fn cancel_sends_delete_for_request() {
    let (base, server) = serve_once("200 OK", String::new()).await;
    let node = NodeInfo::new("worker1").with_address(base);
    let request_id = Uuid::new_v4();

    transport().cancel(&node, request_id).await.expect("delivered");
    let request = server.await.expect("server task");
    assert!(
        request.starts_with(&format!("DELETE /dapi/v1/call/{request_id} HTTP/1.1")),
        "{request}"
    );
}

#[tokio::test]
async fn cancel_rejected_by_node_is_protocol_error() {
    let (base, _server) =
        serve_once("404 Not Found", r#"{"detail":"no such call"}"#.to_owned()).await;
    let node = NodeInfo::new("worker1").with_address(base);
    let err = transport()
        .cancel(&node, Uuid::new_v4())
        .await
        .expect_err("404");
    match err {
        TransportError::Protocol { node, reason } => {
            assert_eq!(node, "worker1");
            assert!(reason.contains("404"), "{reason}");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}
