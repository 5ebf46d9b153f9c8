//! Client for QuestDB: buffered line protocol writes over HTTP or TCP, SQL
//! queries over the HTTP `/exec` endpoint, and a `tracing` layer that stores
//! log events as rows.
//!
//! ```ignore
//! use questdb_client::{Config, Message, QuestDb};
//! use futures::TryStreamExt;
//!
//! let db = QuestDb::connect(Config::http("localhost", 9000)).await?;
//! db.buffer_write(&Message::new("trades").symbol("sym", "AAPL").column("price", 189.5)).await?;
//! db.flush().await?;
//!
//! let rows: Vec<_> = db.query("SELECT * FROM trades").try_collect().await?;
//! db.close().await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod ingress;
pub mod log_layer;
pub mod query;
pub mod transport;

pub use client::{ErrorCallback, QuestDb, QuestDbBuilder};
pub use config::{Config, Protocol};
pub use error::{Error, Result};
pub use ingress::{FlushPolicy, Message, ToMessage, Value};
pub use log_layer::{LogWorker, LogWorkerHandle, QuestDbLayer};
pub use query::{Frame, Row, Rows};
