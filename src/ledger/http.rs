//! HTTP ledger gateway client
//!
//! Talks JSON to a gateway that fronts the mining contract: it serves the
//! current challenge and contract state, relays signed submissions and streams
//! accepted solutions as newline-delimited JSON.

use super::{Ledger, MinerBalances, SolutionAccepted, SolutionStream, Submission, SubmissionOutcome};
use crate::{Challenge, Error, Result, SolverIdentity, Wei};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, ClientBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

/// Solution events buffered between the reader task and the subscriber
const EVENT_BUFFER: usize = 256;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_retries: 10,
        }
    }
}

impl BackoffConfig {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_millis(((delay.as_millis() as f64) * self.multiplier) as u64).min(self.max_delay)
    }
}

#[derive(Debug, Deserialize)]
struct PausedResponse {
    paused: bool,
}

#[derive(Debug, Deserialize)]
struct WinnerResponse {
    winner: Option<SolverIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasPriceResponse {
    gas_price: Wei,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Ledger gateway client
pub struct HttpLedger {
    client: Client,
    base_url: Url,
    backoff_config: BackoffConfig,
    /// Longest wait between two event-stream reconnects
    max_reconnect_delay: Duration,
}

impl HttpLedger {
    /// Create a new gateway client
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let mut base = base_url.as_ref().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::config(format!("Invalid ledger URL: {}", e)))?;

        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;

        Ok(Self {
            client,
            base_url,
            backoff_config: BackoffConfig::default(),
            max_reconnect_delay: Duration::from_secs(30),
        })
    }

    /// Set custom backoff configuration
    pub fn with_backoff_config(mut self, config: BackoffConfig) -> Self {
        self.max_reconnect_delay = config.max_delay.max(Duration::from_secs(1));
        self.backoff_config = config;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::network(format!("Failed to build {} URL: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self.get_with_retry(&url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ledger(format!("GET {} failed: HTTP {}", path, status)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ledger(format!("Failed to parse {} response: {}", path, e)))
    }

    /// GET request with exponential backoff retry
    async fn get_with_retry(&self, url: &Url) -> Result<Response> {
        let mut delay = self.backoff_config.initial_delay;
        let mut attempts = 0;

        loop {
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    if !response.status().is_server_error() {
                        return Ok(response);
                    }

                    if attempts >= self.backoff_config.max_retries {
                        return response.error_for_status().map_err(Error::from);
                    }
                }
                Err(e) => {
                    if !e.is_timeout() && !e.is_connect() || attempts >= self.backoff_config.max_retries {
                        return Err(Error::from(e));
                    }
                }
            }

            warn!(
                "Request to {} failed, retrying in {:?} (attempt {}/{})",
                url.path(),
                delay,
                attempts + 1,
                self.backoff_config.max_retries
            );
            sleep(delay).await;

            delay = self.backoff_config.next_delay(delay);
            attempts += 1;
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    #[instrument(skip(self))]
    async fn current_challenge(&self) -> Result<Challenge> {
        let challenge: Challenge = self.get_json("challenge").await?;
        debug!(
            "Challenge {} seed={} difficulty={}",
            challenge.number,
            challenge.seed.short(),
            challenge.difficulty
        );
        Ok(challenge)
    }

    #[instrument(skip(self))]
    async fn is_paused(&self) -> Result<bool> {
        let response: PausedResponse = self.get_json("paused").await?;
        Ok(response.paused)
    }

    #[instrument(skip(self))]
    async fn is_open(&self, challenge_number: u64) -> Result<bool> {
        let response: WinnerResponse = self
            .get_json(&format!("challenges/{}/winner", challenge_number))
            .await?;
        Ok(response.winner.map_or(true, |winner| winner == SolverIdentity::ZERO))
    }

    #[instrument(skip(self))]
    async fn gas_price(&self) -> Result<Wei> {
        let response: GasPriceResponse = self.get_json("gas-price").await?;
        Ok(response.gas_price)
    }

    #[instrument(skip(self, submission), fields(challenge = submission.challenge_number, nonce = %submission.nonce))]
    async fn submit(&self, submission: &Submission) -> Result<SubmissionOutcome> {
        let url = self.url("solutions")?;
        debug!("Submitting solution to: {}", url);

        // Not retried: a resent submission could pay the fee twice
        let response = self.client.post(url).json(submission).send().await?;

        let status = response.status();
        if status.is_success() {
            let outcome: SubmissionOutcome = response
                .json()
                .await
                .map_err(|e| Error::submission(format!("Failed to parse submission response: {}", e)))?;
            info!("Submission processed: {:?}", outcome);
            return Ok(outcome);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        warn!("Submission failed: HTTP {} {}", status, message);

        if status.is_server_error() {
            Err(Error::ledger(format!("HTTP {}: {}", status, message)))
        } else {
            Err(Error::submission(message))
        }
    }

    #[instrument(skip(self))]
    async fn subscribe(&self) -> Result<SolutionStream> {
        let url = self.url("events")?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(read_events(
            self.client.clone(),
            url,
            tx,
            self.backoff_config.initial_delay,
            self.max_reconnect_delay,
        ));

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn balances(&self, solver: &SolverIdentity) -> Result<MinerBalances> {
        self.get_json(&format!("miners/{}/balances", solver)).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Parse one line of the event stream; blank lines and comments yield nothing
pub fn parse_event_line(line: &str) -> Option<SolutionAccepted> {
    let line = line.trim();
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload.is_empty() || payload.starts_with(':') {
        return None;
    }

    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping unparseable event {:?}: {}", payload, e);
            None
        }
    }
}

/// Keep the event stream connected until the subscriber goes away
async fn read_events(
    client: Client,
    url: Url,
    tx: mpsc::Sender<SolutionAccepted>,
    initial_delay: Duration,
    max_delay: Duration,
) {
    let mut reconnect_delay = initial_delay;

    while !tx.is_closed() {
        debug!("Connecting to event stream at {}", url);

        match client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Connected to solution event stream");
                let mut body = response.bytes_stream();
                let mut buffer = String::new();

                loop {
                    let chunk = tokio::select! {
                        chunk = body.next() => chunk,
                        _ = tx.closed() => return,
                    };

                    match chunk {
                        Some(Ok(bytes)) => {
                            reconnect_delay = initial_delay;
                            buffer.push_str(&String::from_utf8_lossy(&bytes));

                            while let Some(end) = buffer.find('\n') {
                                let line: String = buffer.drain(..=end).collect();
                                if let Some(event) = parse_event_line(&line) {
                                    trace!("Solution event: {:?}", event);
                                    if tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Event stream error: {}", e);
                            break;
                        }
                        None => {
                            info!("Event stream closed");
                            break;
                        }
                    }
                }
            }
            Ok(response) => warn!("Failed to open event stream: HTTP {}", response.status()),
            Err(e) => warn!("Failed to connect to event stream: {}", e),
        }

        tokio::select! {
            _ = sleep(reconnect_delay) => {}
            _ = tx.closed() => return,
        }
        reconnect_delay = (reconnect_delay * 2).min(max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response per connection, in order
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = vec![0u8; 4096];
                let _ = socket.read(&mut request).await;

                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/api", addr)
    }

    fn ledger(url: &str) -> HttpLedger {
        HttpLedger::new(url, Duration::from_secs(5))
            .unwrap()
            .with_backoff_config(BackoffConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
                max_retries: 3,
            })
    }

    #[test]
    fn test_client_creation() {
        let ledger = HttpLedger::new("http://localhost:8545/gateway", Duration::from_secs(30)).unwrap();
        assert_eq!(ledger.url("challenge").unwrap().as_str(), "http://localhost:8545/gateway/challenge");
        assert!(HttpLedger::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_parse_event_lines() {
        let json = r#"{"solver":"0x1111111111111111111111111111111111111111","challengeNumber":12,"reward":"5"}"#;

        let event = parse_event_line(json).unwrap();
        assert_eq!(event.challenge_number, 12);
        assert_eq!(event.solver, SolverIdentity([0x11; 20]));

        let prefixed = parse_event_line(&format!("data: {}\n", json)).unwrap();
        assert_eq!(prefixed, event);

        assert!(parse_event_line("").is_none());
        assert!(parse_event_line(": keep-alive").is_none());
        assert!(parse_event_line("{garbage").is_none());
    }

    #[tokio::test]
    async fn test_fetch_state() {
        let url = serve(vec![
            (
                200,
                r#"{"challengeNumber":4,"seed":"0x0101010101010101010101010101010101010101010101010101010101010101","difficulty":20,"difficultyTarget":"0x00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff","reward":"1000"}"#,
            ),
            (200, r#"{"paused":false}"#),
            (200, r#"{"winner":"0x0000000000000000000000000000000000000000"}"#),
            (200, r#"{"gasPrice":"3000000000"}"#),
        ])
        .await;
        let ledger = ledger(&url);

        let challenge = ledger.current_challenge().await.unwrap();
        assert_eq!(challenge.number, 4);
        assert_eq!(challenge.difficulty_target.difficulty_level(), 20);
        assert!(!ledger.is_paused().await.unwrap());
        assert!(ledger.is_open(4).await.unwrap());
        assert_eq!(ledger.gas_price().await.unwrap(), Wei::new(3_000_000_000));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let url = serve(vec![(503, "{}"), (502, "{}"), (200, r#"{"paused":true}"#)]).await;
        assert!(ledger(&url).is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn test_submission_rejection_message() {
        let url = serve(vec![(400, r#"{"error":"Insufficient protocol fee"}"#)]).await;
        let submission = Submission {
            challenge_number: 1,
            solver: SolverIdentity::ZERO,
            candidate: crate::CandidateText::new(vec![b'a'; 120]).unwrap(),
            nonce: crate::Nonce::new(1),
            fee: Wei::new(0),
            gas_price: Wei::new(1),
            gas_limit: 1,
        };

        let err = ledger(&url).submit(&submission).await.unwrap_err();
        assert!(matches!(err, Error::Submission { ref message } if message == "Insufficient protocol fee"));
    }

    #[tokio::test]
    async fn test_event_stream() {
        let body = concat!(
            ": hello\n",
            "data: {\"solver\":\"0x2222222222222222222222222222222222222222\",\"challengeNumber\":8}\n",
            "{\"solver\":\"0x3333333333333333333333333333333333333333\",\"challengeNumber\":9}\n",
        );
        let url = serve(vec![(200, body)]).await;

        let mut stream = ledger(&url).subscribe().await.unwrap();
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.challenge_number, 8);
        assert_eq!(second.solver, SolverIdentity([0x33; 20]));
    }
}
