//! Scripted HTTP/1.1 server for exercising the reqwest clients over a real socket.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One canned response. Body parts are written with a pause in between so
/// they reach the client as separate reads.
pub struct StubResponse {
    pub status: &'static str,
    pub content_type: &'static str,
    pub parts: Vec<Vec<u8>>,
    /// Keep the socket open this long after the last part
    pub hold: Duration,
}

impl StubResponse {
    pub fn json(status: &'static str, body: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            parts: vec![body.to_string().into_bytes()],
            hold: Duration::ZERO,
        }
    }

    pub fn event_stream(parts: Vec<Vec<u8>>) -> Self {
        Self {
            status: "200 OK",
            content_type: "text/event-stream",
            parts,
            hold: Duration::ZERO,
        }
    }

    pub fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

pub struct StubServer {
    pub url: String,
    handle: JoinHandle<Vec<String>>,
}

impl StubServer {
    /// Answer one connection per response, in order
    pub async fn start(responses: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);

                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
                    response.status, response.content_type
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                for part in response.parts {
                    socket.write_all(&part).await.unwrap();
                    socket.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                tokio::time::sleep(response.hold).await;
                let _ = socket.shutdown().await;
            }
            requests
        });

        Self { url, handle }
    }

    /// Raw text of every request served
    pub async fn requests(self) -> Vec<String> {
        self.handle.await.unwrap()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_string();
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + length {
            break;
        }
    }

    String::from_utf8_lossy(&data).to_string()
}
