//! Client configuration.
//!
//! A [`Config`] can be built in code, deserialized with serde, or parsed from
//! a QuestDB client configuration string:
//!
//! ```text
//! http::addr=localhost:9000;username=admin;password=quest;auto_flush_rows=1000;
//! ```
//!
//! [`Config::from_env`] reads the same string from `QDB_CLIENT_CONF`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ingress::FlushPolicy;

/// Environment variable holding a configuration string.
pub const CONF_ENV: &str = "QDB_CLIENT_CONF";

pub const DEFAULT_HTTP_PORT: u16 = 9000;
pub const DEFAULT_TCP_PORT: u16 = 9009;

/// Transport used for writes. Queries always go over HTTP(S).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http | Protocol::Https => DEFAULT_HTTP_PORT,
            Protocol::Tcp => DEFAULT_TCP_PORT,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(Error::Config(format!("unsupported protocol {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: Protocol,
    pub host: String,
    /// Port of the write endpoint.
    pub port: u16,
    /// Port of the HTTP query endpoint. Defaults to `port` for HTTP(S) and
    /// to 9000 for TCP.
    pub query_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Bearer token, used instead of basic auth when set.
    pub token: Option<String>,
    pub auto_flush: bool,
    pub auto_flush_rows: usize,
    pub auto_flush_bytes: usize,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let policy = FlushPolicy::default();
        Self {
            protocol: Protocol::Http,
            host: "localhost".to_string(),
            port: DEFAULT_HTTP_PORT,
            query_port: None,
            username: None,
            password: None,
            token: None,
            auto_flush: policy.auto_flush,
            auto_flush_rows: policy.max_rows,
            auto_flush_bytes: policy.max_bytes,
            request_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// HTTP writes and queries against `host:port`.
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// TCP writes to `host:port`; queries go to `host:9000` unless `query_port` is set.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.auto_flush = policy.auto_flush;
        self.auto_flush_rows = policy.max_rows;
        self.auto_flush_bytes = policy.max_bytes;
        self
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            max_rows: self.auto_flush_rows,
            max_bytes: self.auto_flush_bytes,
            auto_flush: self.auto_flush,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Base URL of the HTTP query endpoint, e.g. `http://localhost:9000`.
    pub fn query_url(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Https => "https",
            Protocol::Http | Protocol::Tcp => "http",
        };
        let port = self.query_port.unwrap_or(match self.protocol {
            Protocol::Http | Protocol::Https => self.port,
            Protocol::Tcp => DEFAULT_HTTP_PORT,
        });
        format!("{}://{}:{}", scheme, self.host, port)
    }

    /// URL of the HTTP write endpoint.
    pub fn write_url(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Https => "https",
            Protocol::Http | Protocol::Tcp => "http",
        };
        format!("{}://{}:{}/write", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.auto_flush && (self.auto_flush_rows == 0 || self.auto_flush_bytes == 0) {
            return Err(Error::Config(
                "auto flush thresholds must be greater than zero".into(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "username and password must be set together".into(),
            ));
        }
        if self.protocol == Protocol::Tcp && (self.username.is_some() || self.token.is_some()) {
            return Err(Error::Config(
                "tcp transport does not support authentication, use http or https".into(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration string such as `http::addr=localhost:9000;`.
    ///
    /// A literal `;` inside a value is written as `;;`.
    pub fn from_conf_str(conf: &str) -> Result<Self> {
        let (proto, rest) = conf
            .split_once("::")
            .ok_or_else(|| Error::Config("missing \"<protocol>::\" prefix".into()))?;
        let protocol = Protocol::parse(proto.trim())?;
        let mut config = Config {
            protocol,
            port: protocol.default_port(),
            ..Default::default()
        };

        for (key, value) in conf_pairs(rest)? {
            match key.as_str() {
                "addr" => {
                    let (host, port) = match value.rsplit_once(':') {
                        Some((host, port)) => (
                            host.to_string(),
                            port.parse::<u16>()
                                .map_err(|_| Error::Config(format!("invalid port in addr {:?}", value)))?,
                        ),
                        None => (value.clone(), protocol.default_port()),
                    };
                    config.host = host;
                    config.port = port;
                }
                "query_port" => config.query_port = Some(parse_num(&key, &value)?),
                "username" => config.username = Some(value),
                "password" => config.password = Some(value),
                "token" => config.token = Some(value),
                "auto_flush" => {
                    config.auto_flush = match value.as_str() {
                        "on" => true,
                        "off" => false,
                        other => {
                            return Err(Error::Config(format!(
                                "auto_flush must be on or off, got {:?}",
                                other
                            )))
                        }
                    }
                }
                "auto_flush_rows" => {
                    config.auto_flush_rows = match value.as_str() {
                        "off" => usize::MAX,
                        v => parse_num(&key, v)?,
                    }
                }
                "auto_flush_bytes" => {
                    config.auto_flush_bytes = match value.as_str() {
                        "off" => usize::MAX,
                        v => parse_num(&key, v)?,
                    }
                }
                "request_timeout" => config.request_timeout_ms = parse_num(&key, &value)?,
                other => return Err(Error::Config(format!("unknown key {:?}", other))),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse the configuration string stored in `QDB_CLIENT_CONF`.
    pub fn from_env() -> Result<Self> {
        let conf = std::env::var(CONF_ENV)
            .map_err(|_| Error::Config(format!("{} is not set", CONF_ENV)))?;
        Self::from_conf_str(&conf)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} expects a number, got {:?}", key, value)))
}

fn conf_pairs(s: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '=' if !in_value => in_value = true,
            ';' if chars.peek() == Some(&';') && in_value => {
                chars.next();
                value.push(';');
            }
            ';' => {
                if !in_value {
                    if key.trim().is_empty() {
                        continue;
                    }
                    return Err(Error::Config(format!("key {:?} has no value", key.trim())));
                }
                pairs.push((key.trim().to_string(), std::mem::take(&mut value)));
                key.clear();
                in_value = false;
            }
            c if in_value => value.push(c),
            c => key.push(c),
        }
    }
    if in_value {
        pairs.push((key.trim().to_string(), value));
    } else if !key.trim().is_empty() {
        return Err(Error::Config(format!("key {:?} has no value", key.trim())));
    }
    Ok(pairs)
}
