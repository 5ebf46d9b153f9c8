use std::fmt;
use std::sync::Arc;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingress::{encode, Buffer, ToMessage};
use crate::query::{Frame, QueryResponse, Row, Rows};
use crate::transport::{QueryClient, Sender};

/// Observer for errors returned by the server (rejected writes and queries).
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

// Buffer and sender share one lock so appends and flushes never interleave.
struct Ingress {
    buffer: Buffer,
    sender: Option<Sender>,
}

/// Client for writing rows to and querying a QuestDB instance.
///
/// Writes are encoded as line protocol and collected in a buffer that is sent
/// by [`flush`](Self::flush), by [`write`](Self::write), or automatically once
/// the configured row or byte threshold is reached. A failed flush leaves the
/// buffer untouched so the caller can retry; nothing is retried implicitly.
///
/// Call [`close`](Self::close) before dropping the client, otherwise buffered
/// rows are lost.
///
/// Cancelling a flush future after its request went out leaves the rows
/// buffered; flushing again may then store them twice.
pub struct QuestDb {
    ingress: Mutex<Ingress>,
    queries: QueryClient,
    on_error: Option<ErrorCallback>,
}

pub struct QuestDbBuilder {
    config: Config,
    on_error: Option<ErrorCallback>,
}

impl QuestDbBuilder {
    /// Called with every server-side rejection before it is returned.
    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub async fn connect(self) -> Result<QuestDb> {
        self.config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        let sender = Sender::connect(&self.config, client.clone()).await?;
        debug!(
            protocol = ?self.config.protocol,
            host = %self.config.host,
            port = self.config.port,
            "connected"
        );

        Ok(QuestDb {
            ingress: Mutex::new(Ingress {
                buffer: Buffer::new(self.config.flush_policy()),
                sender: Some(sender),
            }),
            queries: QueryClient::new(client, &self.config),
            on_error: self.on_error,
        })
    }
}

impl QuestDb {
    pub fn builder(config: Config) -> QuestDbBuilder {
        QuestDbBuilder {
            config,
            on_error: None,
        }
    }

    pub async fn connect(config: Config) -> Result<Self> {
        Self::builder(config).connect().await
    }

    /// Write one row and flush it, together with anything already buffered.
    pub async fn write<M: ToMessage + ?Sized>(&self, msg: &M) -> Result<()> {
        let line = encode(&msg.to_message())?;
        let mut ingress = self.ingress.lock().await;
        ensure_open(&ingress)?;
        ingress.buffer.append(&line);
        self.flush_locked(&mut ingress).await
    }

    /// Write several rows in one request. Nothing is buffered if any row fails to encode.
    pub async fn write_all<I>(&self, msgs: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToMessage,
    {
        let lines = encode_all(msgs)?;
        let mut ingress = self.ingress.lock().await;
        ensure_open(&ingress)?;
        for line in &lines {
            ingress.buffer.append(line);
        }
        self.flush_locked(&mut ingress).await
    }

    /// Buffer one row; it is sent on the next flush or when a threshold is reached.
    ///
    /// If the row triggers an auto-flush that fails, the row is already in the
    /// buffer when the error is returned. Retry with [`flush`](Self::flush),
    /// not by writing the row again.
    pub async fn buffer_write<M: ToMessage + ?Sized>(&self, msg: &M) -> Result<()> {
        let line = encode(&msg.to_message())?;
        let mut ingress = self.ingress.lock().await;
        ensure_open(&ingress)?;
        if ingress.buffer.append(&line) {
            self.flush_locked(&mut ingress).await?;
        }
        Ok(())
    }

    /// Buffer several rows. Auto-flush may fire more than once.
    ///
    /// If an auto-flush fails, the remaining rows are still buffered and the
    /// error is returned after all of them were appended.
    pub async fn buffer_write_all<I>(&self, msgs: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToMessage,
    {
        let lines = encode_all(msgs)?;
        let mut ingress = self.ingress.lock().await;
        ensure_open(&ingress)?;
        let mut failed = None;
        for line in &lines {
            if ingress.buffer.append(line) && failed.is_none() {
                if let Err(e) = self.flush_locked(&mut ingress).await {
                    failed = Some(e);
                }
            }
        }
        failed.map_or(Ok(()), Err)
    }

    /// Send everything buffered as one request.
    pub async fn flush(&self) -> Result<()> {
        let mut ingress = self.ingress.lock().await;
        ensure_open(&ingress)?;
        self.flush_locked(&mut ingress).await
    }

    /// Flush what is left and release the write connection.
    ///
    /// The connection is released even when the final flush fails; that error
    /// is still returned. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut ingress = self.ingress.lock().await;
        if ingress.sender.is_none() {
            return Ok(());
        }
        let flushed = self.flush_locked(&mut ingress).await;
        let released = match ingress.sender.take() {
            Some(sender) => sender.close().await,
            None => Ok(()),
        };
        debug!("closed");
        flushed.and(released)
    }

    pub async fn buffered_rows(&self) -> usize {
        self.ingress.lock().await.buffer.rows()
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.ingress.lock().await.buffer.len()
    }

    async fn flush_locked(&self, ingress: &mut Ingress) -> Result<()> {
        if ingress.buffer.is_empty() {
            return Ok(());
        }
        let rows = ingress.buffer.rows();
        let bytes = ingress.buffer.len();
        let body = ingress.buffer.body();
        let sender = ingress.sender.as_mut().ok_or(Error::Closed)?;

        match sender.send(body).await {
            Ok(()) => {
                ingress.buffer.clear();
                debug!(rows, bytes, "flushed");
                Ok(())
            }
            Err(e) => {
                warn!(rows, bytes, error = %e, "flush failed, rows kept in buffer");
                self.report(&e);
                Err(e)
            }
        }
    }

    fn report(&self, err: &Error) {
        if let (true, Some(callback)) = (err.is_remote(), &self.on_error) {
            callback(err);
        }
    }

    async fn exec(&self, sql: &str) -> Result<QueryResponse> {
        self.queries.exec(sql).await.map_err(|e| {
            self.report(&e);
            e
        })
    }

    /// Run `sql` and stream its rows.
    ///
    /// The request is sent when the stream is first polled; rows are converted
    /// as they are pulled. The stream cannot be restarted.
    ///
    /// The response body is read in full before the first row is yielded, so
    /// memory use grows with the result size. Use `LIMIT` for large results.
    pub fn query<'a>(&'a self, sql: &str) -> BoxStream<'a, Result<Row>> {
        let sql = sql.to_owned();
        stream::once(async move { self.exec(&sql).await })
            .map_ok(|resp| stream::iter(resp.into_rows()))
            .try_flatten()
            .boxed()
    }

    /// Like [`query`](Self::query), mapping each row onto `T` by column name.
    pub fn query_as<'a, T>(&'a self, sql: &str) -> BoxStream<'a, Result<T>>
    where
        T: DeserializeOwned + Send + 'a,
    {
        self.query(sql)
            .and_then(|row| future::ready(row.deserialize::<T>()))
            .boxed()
    }

    /// Run `sql` and collect the result into a [`Frame`].
    pub async fn query_frame(&self, sql: &str) -> Result<Frame> {
        Frame::from_response(self.exec(sql).await?)
    }

    fn exec_sync(&self, sql: &str) -> Result<QueryResponse> {
        self.queries.exec_sync(sql).map_err(|e| {
            self.report(&e);
            e
        })
    }

    /// Blocking [`query`](Self::query). Do not call from an async runtime thread.
    pub fn query_sync(&self, sql: &str) -> Result<Rows> {
        Ok(self.exec_sync(sql)?.into_rows())
    }

    /// Blocking [`query_as`](Self::query_as).
    pub fn query_as_sync<T: DeserializeOwned>(
        &self,
        sql: &str,
    ) -> Result<impl Iterator<Item = Result<T>>> {
        Ok(self
            .query_sync(sql)?
            .map(|row| row.and_then(|r| r.deserialize::<T>())))
    }

    /// Blocking [`query_frame`](Self::query_frame).
    pub fn query_frame_sync(&self, sql: &str) -> Result<Frame> {
        Frame::from_response(self.exec_sync(sql)?)
    }
}

impl fmt::Debug for QuestDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestDb")
            .field("queries", &self.queries)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for QuestDb {
    fn drop(&mut self) {
        let ingress = self.ingress.get_mut();
        if !ingress.buffer.is_empty() {
            warn!(
                rows = ingress.buffer.rows(),
                "client dropped with unflushed rows; call close() to send them"
            );
        }
    }
}

fn ensure_open(ingress: &Ingress) -> Result<()> {
    match ingress.sender {
        Some(_) => Ok(()),
        None => Err(Error::Closed),
    }
}

fn encode_all<I>(msgs: I) -> Result<Vec<String>>
where
    I: IntoIterator,
    I::Item: ToMessage,
{
    msgs.into_iter().map(|m| encode(&m.to_message())).collect()
}
