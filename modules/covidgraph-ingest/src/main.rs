use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use covidgraph_common::Config;
use covidgraph_graph::{GraphClient, Neo4jStore};
use covidgraph_ingest::Pipeline;

#[derive(Parser)]
#[command(name = "covidgraph", about = "Load JHU case reports and UN population data into Neo4j")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory for downloads and extracted archives (overrides COVIDGRAPH_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Download sources even when the files already exist.
    #[arg(long, global = true)]
    no_skip_existing: bool,

    /// Replace a previously extracted JHU archive.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Year of population data to load (overrides COVIDGRAPH_REFERENCE_YEAR).
    #[arg(long, global = true)]
    reference_year: Option<i32>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Setup, download, ingest both sources, tag latest reports.
    Run,
    /// Create constraints and indexes.
    Setup,
    /// Ingest already-extracted JHU daily reports.
    IngestJhu,
    /// Ingest an already-downloaded WPP population table.
    IngestWpp,
    /// Recompute the Latest label.
    TagLatest,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("covidgraph=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.no_skip_existing {
        config.skip_existing = false;
    }
    if cli.overwrite {
        config.overwrite_extracted = true;
    }
    if let Some(year) = cli.reference_year {
        config.reference_year = year;
    }
    config.log_redacted();

    let client = GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
        .await
        .context("Failed to connect to Neo4j")?;
    client.ping().await.context("Neo4j is not answering")?;
    let pipeline = Pipeline::new(config, Arc::new(Neo4jStore::new(client)));

    let summary = match cli.command.unwrap_or(Command::Run) {
        Command::Run => serde_json::to_value(pipeline.run().await?)?,
        Command::Setup => {
            pipeline.setup().await?;
            serde_json::json!({ "setup": "ok" })
        }
        Command::IngestJhu => serde_json::to_value(pipeline.ingest_jhu().await?)?,
        Command::IngestWpp => serde_json::to_value(pipeline.ingest_wpp().await?)?,
        Command::TagLatest => serde_json::to_value(pipeline.tag_latest().await?)?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!("covidgraph finished");
    Ok(())
}
