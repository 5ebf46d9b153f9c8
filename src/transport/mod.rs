//! Network side of the client: line protocol senders and the SQL query client.
//!
//! Nothing in here retries. A failed send or query is reported once to the caller.

pub mod http;
pub mod query;
pub mod tcp;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::Deserialize;

use crate::config::{Config, Protocol};
use crate::error::Result;

pub use http::HttpSender;
pub use query::QueryClient;
pub use tcp::TcpSender;

/// Sends encoded line protocol to the write endpoint.
#[derive(Debug)]
pub enum Sender {
    Http(HttpSender),
    Tcp(TcpSender),
}

impl Sender {
    pub async fn connect(config: &Config, client: reqwest::Client) -> Result<Self> {
        match config.protocol {
            Protocol::Http | Protocol::Https => Ok(Sender::Http(HttpSender::new(client, config))),
            Protocol::Tcp => Ok(Sender::Tcp(TcpSender::connect(config).await?)),
        }
    }

    /// Send `body` as a single request.
    pub async fn send(&mut self, body: Bytes) -> Result<()> {
        match self {
            Sender::Http(s) => s.send(body).await,
            Sender::Tcp(s) => s.send(body).await,
        }
    }

    /// Release the underlying connection.
    pub async fn close(self) -> Result<()> {
        match self {
            Sender::Http(_) => Ok(()),
            Sender::Tcp(s) => s.close().await,
        }
    }
}

/// `Authorization` header value for the configured credentials.
pub(crate) fn auth_header(config: &Config) -> Option<String> {
    if let Some(token) = &config.token {
        return Some(format!("Bearer {}", token));
    }
    match (&config.username, &config.password) {
        (Some(user), Some(pass)) => Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", user, pass))
        )),
        _ => None,
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
    #[serde(default)]
    position: Option<u64>,
}

/// Pull the human readable message (and SQL position, if any) out of an error body.
pub(crate) fn error_details(status: u16, body: &str) -> (String, Option<u64>) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => (err.message, err.position),
        Err(_) if !body.trim().is_empty() => (body.trim().to_string(), None),
        Err(_) => (format!("HTTP status {}", status), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header() {
        let config = Config::default().with_credentials("admin", "quest");
        assert_eq!(auth_header(&config).as_deref(), Some("Basic YWRtaW46cXVlc3Q="));
    }

    #[test]
    fn token_wins_over_basic_auth() {
        let mut config = Config::default().with_credentials("admin", "quest");
        config.token = Some("abc".into());
        assert_eq!(auth_header(&config).as_deref(), Some("Bearer abc"));
        assert_eq!(auth_header(&Config::default()), None);
    }

    #[test]
    fn error_details_reads_questdb_bodies() {
        let (msg, pos) = error_details(400, r#"{"query":"selec 1","error":"unexpected token","position":0}"#);
        assert_eq!(msg, "unexpected token");
        assert_eq!(pos, Some(0));

        let (msg, pos) = error_details(400, r#"{"code":"invalid","message":"bad line","line":1}"#);
        assert_eq!(msg, "bad line");
        assert_eq!(pos, None);

        assert_eq!(error_details(502, "gateway down\n").0, "gateway down");
        assert_eq!(error_details(500, "").0, "HTTP status 500");
    }
}
