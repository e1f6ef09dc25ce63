//! A small Jenkins stand-in whose build detail responses are delayed.
//!
//! mockito answers immediately, so timing-dependent behaviour (fetch batching,
//! run timeouts) is exercised against this server instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct State {
    job: String,
    feed: String,
    detail_delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    detail_requests: AtomicUsize,
}

pub struct SlowJenkins {
    url: String,
    state: Arc<State>,
    server: JoinHandle<()>,
}

impl SlowJenkins {
    /// Serves `job` with `numbers` in its feed; every build detail takes `detail_delay`.
    pub async fn start(job: &str, numbers: impl IntoIterator<Item = u64>, detail_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(State {
            job: job.to_string(),
            feed: numbers
                .into_iter()
                .map(|n| format!("<id>tag:ci:{job}:{n}</id>"))
                .collect(),
            detail_delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            detail_requests: AtomicUsize::new(0),
        });

        let server = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                }
            })
        };

        Self { url, state, server }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Highest number of build detail requests being served at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn detail_requests(&self) -> usize {
        self.state.detail_requests.load(Ordering::SeqCst)
    }
}

impl Drop for SlowJenkins {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<State>) {
    let mut reader = BufReader::new(&mut stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.is_err() {
        return;
    }

    // Drain headers; requests are body-less GETs
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header).await {
            Ok(0) | Err(_) => return,
            Ok(_) if header == "\r\n" => break,
            Ok(_) => {}
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
    let (status, body) = state.respond(&path).await;

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.ok();
    stream.shutdown().await.ok();
}

impl State {
    async fn respond(&self, path: &str) -> (&'static str, String) {
        let not_found = ("404 Not Found", String::new());

        let Some(rest) = path.strip_prefix(&format!("/job/{}/", self.job)) else {
            return not_found;
        };

        match rest {
            "api/json" => ("200 OK", format!(r#"{{"name": "{}"}}"#, self.job)),
            "rssAll" => ("200 OK", self.feed.clone()),
            _ => match rest.strip_suffix("/api/json").and_then(|n| n.parse::<u64>().ok()) {
                Some(number) => ("200 OK", self.build_detail(number).await),
                None => not_found,
            },
        }
    }

    async fn build_detail(&self, number: u64) -> String {
        self.detail_requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.detail_delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        format!(r#"{{"number": {number}, "duration": 60000, "building": false, "result": "SUCCESS"}}"#)
    }
}
