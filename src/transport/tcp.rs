use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{Error, Result};

/// Line protocol over a raw TCP socket.
///
/// The server never acknowledges lines; a send succeeds once the bytes are
/// written. After a failed send the socket is dropped and the next send
/// opens a new one.
#[derive(Debug)]
pub struct TcpSender {
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpSender {
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut sender = Self {
            addr: format!("{}:{}", config.host, config.port),
            timeout: config.request_timeout(),
            stream: None,
        };
        sender.stream = Some(sender.open().await?);
        Ok(sender)
    }

    async fn open(&self) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {}", self.addr)))?
            .map_err(|e| Error::Connection(format!("{}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    pub async fn send(&mut self, body: Bytes) -> Result<()> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };

        let written = tokio::time::timeout(self.timeout, async {
            stream.write_all(&body).await?;
            stream.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Connection(format!("{}: {}", self.addr, e))),
            Err(_) => Err(Error::Connection(format!("timed out writing to {}", self.addr))),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}
