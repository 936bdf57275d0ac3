//! Fake incident endpoint for integration tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

pub struct FakeEndpoint {
    pub url: String,
    requests: Receiver<serde_json::Value>,
    handle: JoinHandle<()>,
}

impl FakeEndpoint {
    /// Serve one connection per entry of `responses` (status line, JSON body),
    /// then stop listening.
    pub fn serve(responses: Vec<(&'static str, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("header");
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().expect("length");
                    }
                }
                let mut request = vec![0u8; content_length];
                reader.read_exact(&mut request).expect("body");
                let json = serde_json::from_slice(&request).expect("json body");
                let _ = tx.send(json);

                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                )
                .expect("respond");
            }
        });
        Self {
            url: format!("http://{}/api/incidents/create-from-detection", addr),
            requests: rx,
            handle,
        }
    }

    /// Wait for the server thread and return every request body it received.
    pub fn finish(self) -> Vec<serde_json::Value> {
        self.handle.join().expect("endpoint thread");
        self.requests.try_iter().collect()
    }
}

/// Address that refuses connections.
pub fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{}/api/incidents/create-from-detection", addr)
}
