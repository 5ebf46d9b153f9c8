use reqwest::header::AUTHORIZATION;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::query::QueryResponse;

/// Client for the HTTP `/exec` endpoint, usable from async code or blocking threads.
#[derive(Debug, Clone)]
pub struct QueryClient {
    client: reqwest::Client,
    agent: ureq::Agent,
    exec_url: String,
    auth: Option<String>,
}

impl QueryClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self {
            client,
            agent,
            exec_url: format!("{}/exec", config.query_url()),
            auth: super::auth_header(config),
        }
    }

    pub async fn exec(&self, sql: &str) -> Result<QueryResponse> {
        let mut req = self.client.get(&self.exec_url).query(&[("query", sql)]);
        if let Some(auth) = &self.auth {
            req = req.header(AUTHORIZATION, auth);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(query_error(status.as_u16(), &text));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        QueryResponse::from_slice(&body)
    }

    /// Blocking variant of [`exec`](Self::exec). Must not run on an async runtime thread.
    pub fn exec_sync(&self, sql: &str) -> Result<QueryResponse> {
        let mut req = self.agent.get(&self.exec_url).query("query", sql);
        if let Some(auth) = &self.auth {
            req = req.set("Authorization", auth);
        }

        match req.call() {
            Ok(resp) => Ok(serde_json::from_reader(resp.into_reader())?),
            Err(ureq::Error::Status(status, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                Err(query_error(status, &text))
            }
            Err(ureq::Error::Transport(e)) => Err(Error::Connection(e.to_string())),
        }
    }
}

fn query_error(status: u16, body: &str) -> Error {
    let (message, position) = super::error_details(status, body);
    Error::Query {
        status,
        message,
        position,
    }
}
