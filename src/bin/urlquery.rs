use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use urlquery::storage::json_to_bson;
use urlquery::{MemoryCollection, QueryParams, QueryService, ServiceConfig, logger, translate};

#[derive(Parser, Debug)]
#[command(name = "urlquery", version, about = "Translate and run URL-style document queries", long_about = None)]
struct Cli {
    /// Path to a config file (TOML)
    #[arg(long, global = true, help = "Path to a config file (TOML). If omitted, defaults and env are used.")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Print the query descriptor for a query string as JSON")]
    Translate {
        #[arg(help = "Query string, e.g. 'age[gte]=18&sort=-age&limit=5'")]
        query: String,
    },
    #[command(about = "Run a query string against documents loaded from an NDJSON file")]
    Run {
        #[arg(long, help = "NDJSON file, one document per line")]
        data: PathBuf,
        #[arg(long, default_value = "default", help = "Collection name used in diagnostics")]
        collection: String,
        #[arg(long, help = "Return plain documents without virtual fields")]
        lean: bool,
        #[arg(help = "Query string, e.g. 'type=count&status=open'")]
        query: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    // Precedence: env > config file > defaults
    let cfg = match path {
        Some(p) => ServiceConfig::load(p)?,
        None => ServiceConfig::default(),
    };
    Ok(cfg.with_env())
}

fn load_ndjson(
    collection: &MemoryCollection,
    path: &Path,
) -> Result<usize, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)?;
    let mut n = 0usize;
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| format!("{}:{}: {e}", path.display(), lineno + 1))?;
        let bson::Bson::Document(doc) = json_to_bson(&value) else {
            return Err(format!("{}:{}: expected a JSON object", path.display(), lineno + 1).into());
        };
        collection.insert(doc);
        n += 1;
    }
    Ok(n)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config(cli.config.as_deref())?;
    if cfg.wants_logging() {
        logger::configure_logging(cfg.log_dir.as_deref(), cfg.log_level.as_deref(), cfg.log_retention)?;
    }
    match cli.command {
        Commands::Translate { query } => {
            let desc = translate(&QueryParams::from_query_string(&query))?;
            println!("{}", serde_json::to_string_pretty(&desc)?);
        }
        Commands::Run { data, collection, lean, query } => {
            let col = Arc::new(MemoryCollection::new(collection));
            let loaded = load_ndjson(&col, &data)?;
            log::info!("loaded {loaded} documents into {}", col.name());
            let service = QueryService::from_config(col, &cfg);
            let params = QueryParams::from_query_string(&query);
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            let out = rt.block_on(async {
                if lean { service.lean_query(&params).await } else { service.query(&params).await }
            })?;
            println!("{}", serde_json::to_string_pretty(&out.to_json()?)?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
