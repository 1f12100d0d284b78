use std::sync::Arc;

use clap::Parser;
use manualrag::{
    Config,
    ConfigDb,
    DataDir,
    EmbeddingCache,
    VectorIndex,
    config::{Settings, validate_key},
    error::{self, Error},
    grounding::{AnswerGenerator, DryRunGenerator, GroundingRequest, PromptStyle, summarize},
    incremental::{self, load_registry},
    ingestion::{IngestReport, Ingestor},
    retrieval::{QueryContext, Retriever},
    walker::discover_manuals,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, IngestArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("MANUALRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    if let Command::Config { action } = &cli.command {
        return cmd_config(&config_db, action);
    }
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let overrides: Vec<(&str, String)> = cli
        .overrides
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    let config = Config::load(&config_db, &overrides)?;

    match cli.command {
        Command::Rebuild(args) => {
            let report = cmd_ingest(&config_db, &data_dir, &config, &args, true)?;
            print_report(&report, args.json)?;
        }
        Command::Sync(args) => {
            let report = cmd_ingest(&config_db, &data_dir, &config, &args, false)?;
            print_report(&report, args.json)?;
        }
        Command::Retrieve(args) => {
            let context = retrieve(&data_dir, &config, &args.query, args.limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else {
                print_context(&context);
            }
        }
        Command::Ask(args) => {
            let context = retrieve(&data_dir, &config, &args.query, None)?;
            let style = if args.concise {
                PromptStyle::Concise
            } else {
                PromptStyle::Detailed
            };
            let request = GroundingRequest::new(&config.answer, &context, style);
            if args.json {
                let value = serde_json::json!({
                    "request": request,
                    "summary": summarize(&context),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                let mut generator = DryRunGenerator::new(config.answer.clone());
                println!("{}", generator.generate(&request)?);
            }
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &config, args.json)?;
        }
        Command::Reset => {
            let index = VectorIndex::open(&data_dir.index_db())?;
            index.reset()?;
            config_db.replace_documents(&[])?;
            eprintln!("Index and document registry cleared.");
        }
        Command::Mcp => {
            manualrag::mcp::run_mcp(data_dir, config_db, &config)?;
        }
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_ingest(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &Config,
    args: &IngestArgs,
    full: bool,
) -> error::Result<IngestReport> {
    let manuals_dir = config.resolve_manuals_dir(data_dir, args.manuals.as_deref());
    let files = discover_manuals(&manuals_dir)?;
    eprintln!("Found {} manual(s) in {}", files.len(), manuals_dir.display());

    let index = VectorIndex::open(&data_dir.index_db())?;
    let cache = EmbeddingCache::open(&data_dir.embedding_cache())?;
    let mut ingestor = Ingestor::new(config, config.embedding.build(), Some(cache))
        .with_progress(!args.no_progress);

    if full {
        ingestor.rebuild(&files, &index, config_db)
    } else {
        incremental::sync(&mut ingestor, &files, &index, config_db)
    }
}

fn print_report(report: &IngestReport, json: bool) -> error::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let mode = if report.full_rebuild { "Rebuilt" } else { "Synced" };
    println!(
        "{mode}: {} manual(s), {} chunk(s), {} cached embedding(s)",
        report.documents, report.chunks, report.cache_hits
    );
    if report.deleted_documents > 0 {
        println!("Removed {} deleted manual(s)", report.deleted_documents);
    }
    if report.empty_documents > 0 {
        println!("{} manual(s) had no extractable text", report.empty_documents);
    }
    for skipped in &report.skipped {
        println!("Skipped {}: {}", skipped.relative_path, skipped.reason);
    }
    Ok(())
}

fn retrieve(
    data_dir: &DataDir,
    config: &Config,
    query: &str,
    limit: Option<usize>,
) -> error::Result<QueryContext> {
    let index = Arc::new(VectorIndex::open(&data_dir.index_db())?);
    if index.is_empty()? {
        eprintln!("The index is empty; run `manualrag sync` first.");
    }
    let mut retriever = Retriever::new(
        index,
        config.embedding.build(),
        Some(config.reranker.build()),
        config.classifier(),
        config.retrieval,
    )?;
    retriever.retrieve_limited(query, limit)
}

fn print_context(context: &QueryContext) {
    if context.is_empty() {
        println!("No passages found for \"{}\"", context.query);
        return;
    }

    if !context.domains.is_empty() {
        let domains: Vec<&str> = context.domains.iter().map(|d| d.as_str()).collect();
        println!("Domains: {}", domains.join(", "));
    }
    if context.fallback_used {
        println!("(no passages in the detected domains; searched all manuals)");
    }

    for passage in &context.passages {
        let mut location = passage.relative_path.clone();
        if let Some(page) = passage.page {
            location.push_str(&format!(" p.{page}"));
        }
        if let Some(section) = &passage.section {
            location.push_str(&format!(" [{section}]"));
        }
        let score = passage.relevance.unwrap_or(passage.similarity);
        println!("\n{}. {} {:.3} {location}", passage.rank, passage.document_id, score);
        println!("{}", passage.text.trim());
    }
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &Config,
    json: bool,
) -> error::Result<()> {
    let index = VectorIndex::open(&data_dir.index_db())?;
    let chunks = index.len()?;
    let indexed_model = index.embedding_model()?;
    let domains = index.domains()?;
    let registry = load_registry(config_db)?;
    let manuals_dir = config.manuals_dir(data_dir);

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root(),
            "manuals_dir": manuals_dir,
            "embedding_model": config.embedding.to_string(),
            "indexed_embedding_model": indexed_model,
            "reranker": config.reranker.to_string(),
            "answer_backend": config.answer.to_string(),
            "chunks": chunks,
            "domains": domains,
            "manuals": registry,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Data directory: {}", data_dir.root().display());
    println!("Manuals directory: {}", manuals_dir.display());
    println!("Embedding model: {}", config.embedding);
    if let Some(indexed) = indexed_model.filter(|m| *m != config.embedding.to_string()) {
        println!("  (index was built with {indexed}; run `manualrag rebuild`)");
    }
    println!("Re-ranker: {}", config.reranker);
    println!("Answer backend: {}", config.answer);
    println!("Chunks: {chunks}");
    println!("Manuals: {}", registry.len());
    for record in &registry {
        let domains: Vec<&str> = record.domains.iter().map(|d| d.as_str()).collect();
        println!(
            "  {} {} ({} chunk(s)) [{}]",
            record.short_id(),
            record.relative_path,
            record.chunk_count,
            domains.join(", ")
        );
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: &ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let settings = Settings::from_db(config_db)?;
            let entries = settings.entries();
            if *json {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in &entries {
                    let marker = if settings.get(key).is_some() { "*" } else { " " };
                    println!("{marker} {key} = {value}");
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut settings = Settings::from_db(config_db)?;
            settings.set(key, value.clone())?;
            // Reject values that would make the stored configuration invalid.
            settings.validate()?;
            config_db.set_setting(key, value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            validate_key(key)?;
            if !config_db.remove_setting(key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
            println!("Removed {key}");
        }
    }
    Ok(())
}
