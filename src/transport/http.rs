use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::config::Config;
use crate::error::{Error, Result};

/// Line protocol over HTTP: one `POST /write` per flush.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    auth: Option<String>,
}

impl HttpSender {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            url: config.write_url(),
            auth: super::auth_header(config),
        }
    }

    pub async fn send(&self, body: Bytes) -> Result<()> {
        let mut req = self
            .client
            .post(&self.url)
            .query(&[("precision", "n")])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(auth) = &self.auth {
            req = req.header(AUTHORIZATION, auth);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        let (message, _) = super::error_details(status.as_u16(), &text);
        Err(Error::Server {
            status: status.as_u16(),
            message,
        })
    }
}
