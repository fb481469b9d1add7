use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kycgraph::db::{migrate, Db};
use kycgraph::mcp::{HttpMcpServer, McpServer};
use kycgraph::model::RiskCountrySet;
use kycgraph::store::{GraphStore, ResilientStore, SqliteGraphStore};
use kycgraph::{Config, ContextAssembler, ContextParams};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "kycgraph")]
#[command(about = "Ownership graph retrieval and risk scoring for KYC reviews", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply migrations and verify the graph schema
    Migrate,

    /// Assemble the KYC context for one entity and print it as JSON
    Context {
        /// Legal Entity Identifier of the entity under review
        lei: String,

        #[command(flatten)]
        overrides: ParamOverrides,

        /// Print single-line JSON
        #[arg(long)]
        compact: bool,
    },

    /// Assemble contexts for every LEI in FILE (one per line), JSON lines out
    Batch {
        file: PathBuf,

        #[command(flatten)]
        overrides: ParamOverrides,

        /// Reviews in flight at once (defaults to batch.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Run the MCP server on stdio
    Serve,

    /// Run the MCP server over HTTP on localhost
    ServeHttp {
        /// Port to bind (defaults to http_server.port)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(clap::Args, Debug)]
struct ParamOverrides {
    /// Minimum ownership percentage (0-100)
    #[arg(long)]
    threshold: Option<f64>,

    /// Comma separated ISO-3166 alpha-2 codes, e.g. "IR,KP"
    #[arg(long)]
    risk_countries: Option<String>,

    #[arg(long)]
    top_k: Option<usize>,

    #[arg(long)]
    max_depth: Option<usize>,

    #[arg(long)]
    media_limit: Option<usize>,
}

impl ParamOverrides {
    fn apply(&self, mut params: ContextParams) -> Result<ContextParams> {
        if let Some(threshold) = self.threshold {
            params.threshold_percent = threshold;
        }
        if let Some(raw) = &self.risk_countries {
            params.risk_countries = RiskCountrySet::parse_list(raw)?;
        }
        if let Some(top_k) = self.top_k {
            params.top_k = top_k;
        }
        if let Some(max_depth) = self.max_depth {
            params.max_depth = max_depth;
        }
        if let Some(media_limit) = self.media_limit {
            params.media_limit = media_limit;
        }
        Ok(params)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    // Logs go to stderr so stdout stays clean for JSON and the stdio transport.
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.kycgraph.log_level.as_str()),
    )
    .init();

    match cli.command {
        Command::Migrate => {
            open_database(&config).await?;
            log::info!("Graph database ready at {}", config.db_path().display());
        }
        Command::Context { lei, overrides, compact } => {
            let assembler = build_assembler(&config).await?;
            let params = overrides.apply(assembler.default_params())?;
            let context = assembler.assemble(&lei, &params).await?;
            let json = if compact {
                serde_json::to_string(&context)?
            } else {
                serde_json::to_string_pretty(&context)?
            };
            println!("{}", json);
        }
        Command::Batch { file, overrides, concurrency } => {
            run_batch(&config, &file, &overrides, concurrency).await?;
        }
        Command::Serve => {
            let assembler = build_assembler(&config).await?;
            McpServer::new(assembler).run().await?;
        }
        Command::ServeHttp { port } => {
            log::info!("Starting kycgraph HTTP server v{}", env!("CARGO_PKG_VERSION"));
            let assembler = build_assembler(&config).await?;
            let http_server = HttpMcpServer::new(assembler, &config.http_server)?;
            http_server.run(port.unwrap_or(config.http_server.port)).await?;
        }
    }

    Ok(())
}

/// Open the graph database, applying pending migrations and checking the schema.
async fn open_database(config: &Config) -> Result<Db> {
    log::info!("Database path: {}", config.db_path().display());
    let db = Db::new(config.db_path());

    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)?;
        migrate::verify_schema(conn)
    })
    .await?;

    Ok(db)
}

async fn build_assembler(config: &Config) -> Result<ContextAssembler> {
    let db = open_database(config).await?;
    let sqlite: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db));
    let store: Arc<dyn GraphStore> = Arc::new(ResilientStore::new(sqlite, config.query.clone()));
    Ok(ContextAssembler::new(store, config))
}

async fn run_batch(
    config: &Config,
    file: &Path,
    overrides: &ParamOverrides,
    concurrency: Option<usize>,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read LEI list: {}", file.display()))?;
    let leis: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();

    let assembler = build_assembler(config).await?;
    let params = overrides.apply(assembler.default_params())?;

    let items = assembler.assemble_batch(&leis, &params, concurrency).await;
    let mut failed = 0;
    for item in items {
        let line = match item.outcome {
            Ok(context) => serde_json::json!({
                "lei": item.lei,
                "digest": context.digest()?,
                "context": context,
            }),
            Err(e) => {
                failed += 1;
                serde_json::json!({
                    "lei": item.lei,
                    "error": e.to_string(),
                    "retryable": e.is_transient(),
                })
            }
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    log::info!("Batch complete: {} entities, {} failed", leis.len(), failed);
    Ok(())
}
