use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use questdb_client::{Config, Message, QuestDb};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "questdb-client", about = "Write to and query a QuestDB instance")]
struct Cli {
    /// Client configuration string, e.g. "http::addr=localhost:9000;"
    #[arg(long, env = "QDB_CLIENT_CONF")]
    conf: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a SQL query and print one JSON object per row.
    Query { sql: String },
    /// Read messages as JSON lines and write them.
    Ingest {
        /// Input file; stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.conf {
        Some(conf) => Config::from_conf_str(conf)?,
        None => Config::default(),
    };
    let db = QuestDb::connect(config).await?;

    let outcome = match cli.command {
        Command::Query { sql } => run_query(&db, &sql).await,
        Command::Ingest { file: Some(path) } => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            ingest(&db, file).await
        }
        Command::Ingest { file: None } => ingest(&db, tokio::io::stdin()).await,
    };

    let closed = db.close().await;
    outcome?;
    closed?;
    Ok(())
}

async fn run_query(db: &QuestDb, sql: &str) -> anyhow::Result<()> {
    let mut rows = db.query(sql);
    while let Some(row) = rows.try_next().await? {
        println!("{}", row.to_json());
    }
    Ok(())
}

async fn ingest(db: &QuestDb, input: impl AsyncRead + Unpin) -> anyhow::Result<()> {
    let mut lines = BufReader::new(input).lines();
    let (mut lineno, mut count) = (0usize, 0usize);
    while let Some(line) = lines.next_line().await? {
        lineno += 1;
        if line.trim().is_empty() {
            continue;
        }
        let doc: serde_json::Value =
            serde_json::from_str(&line).with_context(|| format!("line {}", lineno))?;
        db.buffer_write(&Message::from_json(doc)?).await?;
        count += 1;
    }
    db.flush().await?;
    tracing::info!(rows = count, "ingested");
    Ok(())
}
