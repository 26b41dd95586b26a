use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scrip_cli::intent;
use scrip_cli::progress::ProgressEmbedder;
use scrip_core::config::{Config, Settings};
use scrip_core::data_processor::DataProcessor;
use scrip_core::deadline::{CancelToken, Deadline};
use scrip_core::predicate::{Predicate, SupportRequirement};
use scrip_core::types::SupportType;
use scrip_embed::get_default_embedder;
use scrip_retrieval::{format, RetrievalEngine, RetrievalRequest};
use scrip_vector::CatalogStore;

const USAGE: &str = "Usage:
  scrip ingest [source.jsonl] [--limit N]
  scrip query semantic \"<text>\" [--k N]
  scrip query region <region> [--support <type>]
  scrip query support <type,...> [--exclude <type,...>]
  scrip query all | stats
  scrip query filter '<json object>'
  scrip ask \"<question>\"";

fn parse_args() -> (String, Vec<String>) {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((cmd, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    (cmd.clone(), rest.to_vec())
}

/// Remove `--name <value>` from `args` and return the value.
fn take_flag(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(at) = args.iter().position(|a| a == name) else { return Ok(None) };
    if at + 1 >= args.len() {
        bail!("{name} requires a value");
    }
    let value = args.remove(at + 1);
    args.remove(at);
    Ok(Some(value))
}

fn parse_types(list: &str) -> Result<Vec<SupportType>> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<SupportType>().map_err(|e| anyhow!(e)))
        .collect()
}

fn parse_query(mut args: Vec<String>) -> Result<RetrievalRequest> {
    let k = take_flag(&mut args, "--k")?.map(|v| v.parse::<usize>()).transpose()?;
    let support = take_flag(&mut args, "--support")?;
    let exclude = take_flag(&mut args, "--exclude")?;
    let Some((mode, rest)) = args.split_first() else { bail!("query needs a mode\n{USAGE}") };
    let positional = rest.join(" ");

    Ok(match mode.as_str() {
        "semantic" if !positional.is_empty() => RetrievalRequest::Semantic { query: positional, k, filter: None },
        "region" if !positional.is_empty() => {
            let support_type = support.as_deref().map(str::parse::<SupportType>).transpose().map_err(|e| anyhow!(e))?;
            RetrievalRequest::Region { region: positional, support_type }
        }
        "support" if !positional.is_empty() => {
            let excluded = exclude.as_deref().map(parse_types).transpose()?.unwrap_or_default();
            RetrievalRequest::SupportType(SupportRequirement::new(parse_types(&positional)?, excluded))
        }
        "all" => RetrievalRequest::FullListing,
        "stats" => RetrievalRequest::Statistics,
        "filter" if !positional.is_empty() => {
            let value: serde_json::Value = serde_json::from_str(&positional)?;
            RetrievalRequest::MetadataFilter(Predicate::from_json(&value)?)
        }
        other => bail!("bad query arguments for '{other}'\n{USAGE}"),
    })
}

fn ingest(settings: &Settings, mut args: Vec<String>) -> Result<()> {
    let limit = take_flag(&mut args, "--limit")?.map(|v| v.parse::<usize>()).transpose()?;
    let source = args.first().map(PathBuf::from).unwrap_or_else(|| settings.source_jsonl());
    println!("Ingesting from {}", source.display());

    let processor = DataProcessor::new();
    let records = match limit {
        Some(n) => processor.process_file_limited(&source, n)?,
        None => processor.process_file(&source)?,
    };
    let embedder = ProgressEmbedder::new(get_default_embedder(&settings.embedding)?, records.len())?;
    let store = CatalogStore::new(settings.catalog_dir()).with_batch_size(settings.embedding.batch_size);
    let (catalog, index) = store.rebuild(records, &embedder)?;
    embedder.finish("embedded");

    println!("Ingest complete: {} records, dimension {}, written to {}", catalog.len(), index.dim(), store.dir().display());
    Ok(())
}

fn open_engine(settings: &Settings) -> Result<RetrievalEngine> {
    let embedder = get_default_embedder(&settings.embedding)?;
    let store = CatalogStore::new(settings.catalog_dir()).with_batch_size(settings.embedding.batch_size);
    Ok(RetrievalEngine::open(store, embedder, settings.search.clone())?)
}

/// Run one request off the async runtime, cancelling it when the timeout fires.
async fn run_request(engine: Arc<RetrievalEngine>, request: RetrievalRequest, timeout_ms: Option<u64>) -> Result<String> {
    let token = CancelToken::new();
    let deadline = match timeout_ms {
        Some(ms) => Deadline::after(Duration::from_millis(ms)),
        None => Deadline::none(),
    }
    .with_token(token.clone());
    let cap = engine.settings().listing_cap;

    let task = tokio::task::spawn_blocking(move || {
        let response = engine.execute(&request, &deadline)?;
        Ok::<_, scrip_core::Error>(format::render(&request, &response, cap))
    });
    match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), task).await {
            Ok(joined) => Ok(joined??),
            Err(_) => {
                token.cancel();
                bail!("request timed out after {ms} ms")
            }
        },
        None => Ok(task.await??),
    }
}

async fn answer(settings: Settings, request: RetrievalRequest) -> Result<()> {
    let timeout_ms = settings.search.timeout_ms;
    let engine = tokio::task::spawn_blocking(move || open_engine(&settings)).await??;
    let text = run_request(Arc::new(engine), request, timeout_ms).await?;
    println!("{text}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();

    match cmd.as_str() {
        "ingest" => tokio::task::spawn_blocking(move || ingest(&settings, args)).await??,
        "query" => answer(settings, parse_query(args)?).await?,
        "ask" => {
            let question = args.join(" ");
            if question.trim().is_empty() {
                bail!("ask needs a question\n{USAGE}");
            }
            let request = intent::extract(&question);
            info!(?request, "routed question");
            answer(settings, request).await?
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
    }
    Ok(())
}
