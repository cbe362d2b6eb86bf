//! Loopback fixtures shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

/// Minimal HTTP/1.1 responder standing in for the authorization service.
pub struct MockAuthServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
    authorization: Arc<Mutex<Vec<String>>>,
}

impl MockAuthServer {
    /// Number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// `Authorization` header values, in arrival order.
    pub fn authorization_headers(&self) -> Vec<String> {
        self.authorization.lock().unwrap().clone()
    }
}

/// Serve `body` with `status` to every request.
pub async fn spawn_auth_server(status: u16, body: &'static str) -> MockAuthServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let authorization = Arc::new(Mutex::new(Vec::new()));

    let (hits_srv, auth_srv) = (hits.clone(), authorization.clone());
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let hits = hits_srv.clone();
            let authorization = auth_srv.clone();
            tokio::spawn(async move {
                let head = read_request_head(&mut stream).await;
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(value) = header_value(&head, "authorization") {
                    authorization.lock().unwrap().push(value);
                }
                let response = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    MockAuthServer {
        url: format!("http://{addr}/auth"),
        hits,
        authorization,
    }
}

/// Accept requests and never answer them.
pub async fn spawn_stalled_auth_server() -> MockAuthServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_srv = hits.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            hits_srv.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });
    MockAuthServer {
        url: format!("http://{addr}/auth"),
        hits,
        authorization: Arc::new(Mutex::new(Vec::new())),
    }
}

async fn read_request_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// An in-memory WebSocket pair: `(server side, client side)`.
pub async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (server, client)
}

/// A loopback TCP pair: `(relay side, backend side)`.
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (connected.unwrap(), accepted.unwrap().0)
}
