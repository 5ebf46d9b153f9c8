//! Ship application logs to QuestDB.
//!
//! [`QuestDbLayer`] is a `tracing_subscriber` layer that turns every event into
//! one row and hands it to a channel. [`LogWorker`] drains that channel into
//! [`QuestDb::buffer_write`] and flushes periodically and on shutdown.
//!
//! ```ignore
//! let db = Arc::new(QuestDb::connect(Config::default()).await?);
//! let (layer, worker) = QuestDbLayer::new(db.clone());
//! tracing_subscriber::registry().with(layer).init();
//! let handle = worker.spawn();
//! // ...
//! handle.shutdown().await;
//! db.close().await?;
//! ```
//!
//! Logging never fails from the application's point of view: rows that cannot
//! be queued or written are dropped and reported under this crate's target,
//! which the layer itself ignores.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::client::QuestDb;
use crate::ingress::encoder::sanitize_column_name;
use crate::ingress::{Message, Value};

pub const DEFAULT_LOG_TABLE: &str = "_logs";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Targets whose events would feed back into the write path.
const TRANSPORT_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "ureq", "rustls", "tower"];

pub struct QuestDbLayer {
    tx: mpsc::UnboundedSender<Message>,
    table: String,
    max_level: Option<Level>,
    ignored_targets: Vec<String>,
    process_name: String,
}

impl QuestDbLayer {
    /// Create the layer and the worker that writes its rows through `db`.
    pub fn new(db: Arc<QuestDb>) -> (Self, LogWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ignored_targets = vec![env!("CARGO_CRATE_NAME").to_string()];
        ignored_targets.extend(TRANSPORT_TARGETS.iter().map(|t| t.to_string()));

        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());

        let layer = Self {
            tx,
            table: DEFAULT_LOG_TABLE.to_string(),
            max_level: None,
            ignored_targets,
            process_name,
        };
        let worker = LogWorker {
            rx,
            db,
            flush_interval: Some(DEFAULT_FLUSH_INTERVAL),
        };
        (layer, worker)
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Drop events more verbose than `level`.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = Some(level);
        self
    }

    /// Drop events whose target starts with `prefix`.
    pub fn ignore_target(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_targets.push(prefix.into());
        self
    }

    fn wants(&self, meta: &tracing::Metadata<'_>) -> bool {
        if let Some(max) = self.max_level {
            if *meta.level() > max {
                return false;
            }
        }
        !self
            .ignored_targets
            .iter()
            .any(|prefix| meta.target().starts_with(prefix.as_str()))
    }

    fn to_message(&self, event: &Event<'_>) -> Message {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let thread = std::thread::current();
        let mut msg = Message::new(self.table.clone())
            .symbol("level", meta.level().to_string())
            .symbol("target", meta.target())
            .symbol("thread", thread.name().unwrap_or("unnamed"))
            .symbol("process_name", self.process_name.clone());
        if let Some(module) = meta.module_path() {
            msg = msg.symbol("module", module);
        }
        if let Some(file) = meta.file() {
            msg = msg.symbol("file", file);
        }

        msg = msg
            .column("message", visitor.message.unwrap_or_default())
            .column("process", std::process::id());
        if let Some(line) = meta.line() {
            msg = msg.column("line", line);
        }
        if let Some(exc) = visitor.exc_info {
            msg = msg.column("exc_info", exc);
        }
        for (name, value) in visitor.fields {
            let mut name = sanitize_column_name(&name);
            if msg.symbols.contains_key(&name) || msg.columns.contains_key(&name) {
                name = format!("field_{}", name);
            }
            msg.columns.entry(name).or_insert(value);
        }

        msg.at(Utc::now())
    }
}

impl fmt::Debug for QuestDbLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestDbLayer")
            .field("table", &self.table)
            .field("max_level", &self.max_level)
            .field("ignored_targets", &self.ignored_targets)
            .finish()
    }
}

impl<S: Subscriber> Layer<S> for QuestDbLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.wants(event.metadata()) {
            return;
        }
        // a closed channel means the worker is gone; the row is dropped
        let _ = self.tx.send(self.to_message(event));
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    exc_info: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = Some(text(value)),
            "error" | "exception" => self.exc_info = Some(text(value)),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Timestamp(ts) => ts.to_rfc3339(),
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::Float(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::Integer(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match i64::try_from(value) {
            Ok(v) => self.put(field, Value::Integer(v)),
            Err(_) => self.put(field, Value::String(value.to_string())),
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Boolean(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut chain = value.to_string();
        let mut source = value.source();
        while let Some(err) = source {
            chain.push_str(": ");
            chain.push_str(&err.to_string());
            source = err.source();
        }
        self.put(field, Value::String(chain));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }
}

/// Moves rows from a [`QuestDbLayer`] into the client.
pub struct LogWorker {
    rx: mpsc::UnboundedReceiver<Message>,
    db: Arc<QuestDb>,
    flush_interval: Option<Duration>,
}

impl LogWorker {
    /// Flush buffered log rows at this interval. `None` leaves flushing to the
    /// client's thresholds and to shutdown.
    pub fn with_flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn spawn(self) -> LogWorkerHandle {
        let (shutdown, _) = broadcast::channel(1);
        let join = tokio::spawn(self.run(shutdown.subscribe()));
        LogWorkerHandle { shutdown, join }
    }

    /// Forward rows until `shutdown` fires or every layer is dropped, then
    /// drain what is queued and flush once more.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = self.flush_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    while let Ok(msg) = self.rx.try_recv() {
                        self.forward(msg).await;
                    }
                    break;
                }
                maybe = self.rx.recv() => match maybe {
                    Some(msg) => self.forward(msg).await,
                    None => break,
                },
                _ = tick(&mut ticker) => {
                    if let Err(e) = self.db.flush().await {
                        warn!(error = %e, "periodic log flush failed");
                    }
                }
            }
        }

        if let Err(e) = self.db.flush().await {
            warn!(error = %e, "final log flush failed");
        }
    }

    async fn forward(&self, msg: Message) {
        if let Err(e) = self.db.buffer_write(&msg).await {
            warn!(error = %e, table = %msg.table_name, "log row not written");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

pub struct LogWorkerHandle {
    shutdown: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl LogWorkerHandle {
    /// Stop the worker after it has written everything already queued.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "log worker did not shut down cleanly");
        }
    }
}
