use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use engine_client::{ChatRequest, ClientError, EngineClient, EngineClientConfig, WireMessage};
use engine_contract::{Role, StreamEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
struct ScriptedResponse {
    status: u16,
    content_type: &'static str,
    chunks: Vec<ResponseChunk>,
}

/// Single-request HTTP server that replays a scripted chunked response.
struct ScriptedServer {
    base_url: String,
    captured_body: Arc<Mutex<Option<String>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(response: ScriptedResponse) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let captured_body = Arc::new(Mutex::new(None));

        let handle = tokio::spawn({
            let captured_body = Arc::clone(&captured_body);
            async move {
                if let Ok((socket, _)) = listener.accept().await {
                    serve_one(socket, response, captured_body).await;
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            captured_body,
            handle,
        }
    }

    fn captured_body(&self) -> Option<String> {
        self.captured_body
            .lock()
            .expect("captured body lock should not be poisoned")
            .clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn stream_response(chunks: &[(u64, &str)]) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/event-stream",
        chunks: chunks
            .iter()
            .map(|(delay_ms, text)| ResponseChunk {
                delay_ms: *delay_ms,
                bytes: text.as_bytes().to_vec(),
            })
            .collect(),
    }
}

fn request() -> ChatRequest {
    ChatRequest::new(
        "grok-4-1-fast-reasoning",
        vec![WireMessage {
            role: Role::User,
            content: "hi".to_owned(),
        }],
    )
}

fn client_for(server: &ScriptedServer) -> EngineClient {
    EngineClient::new(EngineClientConfig::new(&server.base_url)).expect("client should build")
}

#[tokio::test]
async fn streams_events_in_order_and_posts_history() {
    let server = ScriptedServer::new(stream_response(&[
        (0, "data: {\"type\":\"content\",\"content\":\"Hel"),
        (10, "lo\"}\n\ndata: {\"type\":\"content\",\"content\":\" there\"}\n\n"),
        (0, "data: {\"type\":\"done\"}\n\n"),
    ]))
    .await;

    let result = client_for(&server)
        .stream(&request(), None)
        .await
        .expect("stream should complete");

    assert_eq!(
        result.events,
        vec![
            StreamEvent::content("Hello"),
            StreamEvent::content(" there"),
            StreamEvent::Done,
        ]
    );
    assert!(result.summary.saw_done);
    assert_eq!(result.summary.skipped, 0);

    let body = server.captured_body().expect("request body should be captured");
    let value: serde_json::Value = serde_json::from_str(&body).expect("body should be JSON");
    assert_eq!(value["model"], "grok-4-1-fast-reasoning");
    assert_eq!(value["messages"][0]["role"], "user");
    assert_eq!(value["messages"][0]["content"], "hi");
    assert!(value.get("temperature").is_none());
}

#[tokio::test]
async fn stream_without_done_ends_cleanly() {
    let server = ScriptedServer::new(stream_response(&[(
        0,
        "data: {\"type\":\"content\",\"content\":\"partial\"}",
    )]))
    .await;

    let result = client_for(&server)
        .stream(&request(), None)
        .await
        .expect("stream should end without error");

    assert_eq!(result.events, vec![StreamEvent::content("partial")]);
    assert!(!result.summary.saw_done);
}

#[tokio::test]
async fn non_success_status_surfaces_engine_message() {
    let server = ScriptedServer::new(ScriptedResponse {
        status: 500,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: br#"{"error":"no api key configured"}"#.to_vec(),
        }],
    })
    .await;

    let error = client_for(&server)
        .stream(&request(), None)
        .await
        .expect_err("500 should fail");

    match error {
        ClientError::Status(status, message) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(message, "no api key configured");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_stops_delivery_mid_stream() {
    let server = ScriptedServer::new(stream_response(&[
        (0, "data: {\"type\":\"content\",\"content\":\"first\"}\n\n"),
        (400, "data: {\"type\":\"content\",\"content\":\"late\"}\n\n"),
        (0, "data: {\"type\":\"done\"}\n\n"),
    ]))
    .await;

    let cancel = Arc::new(AtomicBool::new(false));
    let mut observed = Vec::new();
    let outcome = client_for(&server)
        .stream_with_handler(&request(), Some(&cancel), |event| {
            observed.push(event);
            cancel.store(true, Ordering::Release);
        })
        .await;

    assert!(matches!(outcome, Err(ClientError::Cancelled)));
    assert_eq!(observed, vec![StreamEvent::content("first")]);
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("port should bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let client = EngineClient::new(EngineClientConfig::new(format!("http://127.0.0.1:{port}")))
        .expect("client should build");
    let error = client
        .stream(&request(), None)
        .await
        .expect_err("closed port should fail");

    assert!(error.is_transport());
    assert_eq!(error.user_message(), "network error - check your connection");
}

async fn serve_one(
    mut socket: TcpStream,
    response: ScriptedResponse,
    captured_body: Arc<Mutex<Option<String>>>,
) {
    let Ok(body) = read_request(&mut socket).await else {
        return;
    };
    if let Ok(mut slot) = captured_body.lock() {
        *slot = Some(body);
    }

    let headers = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        response.status,
        if response.status == 200 { "OK" } else { "Error" },
        response.content_type,
    );
    if socket.write_all(headers.as_bytes()).await.is_err() {
        return;
    }

    for chunk in response.chunks {
        if chunk.delay_ms > 0 {
            sleep(Duration::from_millis(chunk.delay_ms)).await;
        }
        let prefix = format!("{:X}\r\n", chunk.bytes.len());
        if socket.write_all(prefix.as_bytes()).await.is_err()
            || socket.write_all(&chunk.bytes).await.is_err()
            || socket.write_all(b"\r\n").await.is_err()
        {
            return;
        }
    }

    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(index) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break index + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while request.len() < header_end + content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
    }

    Ok(String::from_utf8_lossy(&request[header_end..]).into_owned())
}
