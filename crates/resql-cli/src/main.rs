mod config;
mod output;

use clap::Parser;
use config::Config;
use resql_client::{Client, ResqlError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "resql", about = "Command-line shell for a resql cluster")]
struct Args {
    /// TOML file with [client] and [log] tables.
    #[arg(long)]
    config: Option<String>,
    /// Node url, e.g. tcp://127.0.0.1:7600. Repeat for every node.
    #[arg(short = 'u', long = "url")]
    urls: Vec<String>,
    #[arg(short = 'c', long)]
    cluster_name: Option<String>,
    #[arg(short = 'n', long)]
    name: Option<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    log_level: Option<String>,
    /// Send statements as readonly requests.
    #[arg(long)]
    readonly: bool,
    /// Statements to run. Read line by line from stdin when none are given.
    statements: Vec<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if !self.urls.is_empty() {
            config.client.urls = self.urls.clone();
        }
        if let Some(cluster_name) = &self.cluster_name {
            config.client.cluster_name = cluster_name.clone();
        }
        if let Some(name) = &self.name {
            config.client.name = Some(name.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.client.timeout_ms = timeout_ms;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level()?)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut client = Client::connect(config.client.clone()).await?;
    let result = if args.statements.is_empty() {
        run_stdin(&mut client, args.readonly).await
    } else {
        run_all(&mut client, &args.statements, args.readonly).await
    };
    client.shutdown().await;
    result
}

async fn run_all(client: &mut Client, statements: &[String], readonly: bool) -> anyhow::Result<()> {
    for sql in statements {
        run_statement(client, sql, readonly).await?;
    }
    Ok(())
}

async fn run_stdin(client: &mut Client, readonly: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let sql = line.trim();
        if sql.is_empty() {
            continue;
        }
        if let Err(err) = run_statement(client, sql, readonly).await {
            match err.downcast_ref::<ResqlError>() {
                Some(ResqlError::ServerReported(_) | ResqlError::Misuse(_)) => eprintln!("error: {err}"),
                _ => return Err(err),
            }
        }
    }
    Ok(())
}

async fn run_statement(client: &mut Client, sql: &str, readonly: bool) -> anyhow::Result<()> {
    client.put_statement(sql);
    let mut rs = client.execute(readonly).await?;
    output::print_results(&mut rs, &mut std::io::stdout().lock())
}
