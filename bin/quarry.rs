use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use quarry::{
    AnalyzerConfig, AnalyzerKind, CancellationToken, Document, FieldOptions, Index, IndexConfig,
    MatchOperator, QueryParser, Schema, WorkloadProfile,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const CONTENTS: &str = "contents";
const FILE_NAME: &str = "fileName";
const FULL_PATH: &str = "fullPath";
const MODIFIED: &str = "modified";

const PRE_TAG: &str = "<b><font color='red'>";
const POST_TAG: &str = "</font></b>";

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Full-text search over a directory of text files", long_about = None)]
struct Cli {
    /// Index directory
    #[arg(long, env = "QUARRY_INDEX_DIR", default_value = "./index")]
    index_dir: PathBuf,

    /// JSON file with index configuration
    #[arg(long, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,

    /// Workload profile (interactive, balanced, bulk)
    #[arg(long, env = "QUARRY_PROFILE")]
    profile: Option<WorkloadProfile>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every file under a directory
    Index(IndexArgs),
    /// Run a query
    Search(SearchArgs),
    /// Delete documents by id
    Delete {
        #[arg(required = true)]
        doc_ids: Vec<u64>,
    },
    /// Merge all segments and purge deleted documents
    Compact,
    /// Print index statistics
    Stats,
}

#[derive(Args)]
struct IndexArgs {
    /// Directory to index
    source: PathBuf,

    /// Only index files with these extensions (default: every file)
    #[arg(long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// Analyzer for `contents` and `fileName` (standard, cjk); used when the index is created
    #[arg(long, env = "QUARRY_ANALYZER", default_value = "standard")]
    analyzer: AnalyzerKind,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    #[arg(long, short = 'n', env = "QUARRY_LIMIT", default_value = "10")]
    limit: usize,

    /// Field searched by terms without a field prefix
    #[arg(long, default_value = FILE_NAME)]
    field: String,

    /// Join adjacent terms with AND instead of OR
    #[arg(long)]
    all: bool,

    /// Show the best fragment of the stored `--field` value of each hit
    #[arg(long)]
    highlight: bool,

    /// Tokens per highlighted fragment
    #[arg(long, default_value = "20")]
    fragment_size: usize,
}

fn schema(kind: AnalyzerKind) -> Result<Schema> {
    let analyzer = match kind {
        AnalyzerKind::Standard => AnalyzerConfig::standard(),
        AnalyzerKind::Cjk => AnalyzerConfig::cjk(),
    };
    Ok(Schema::builder()
        .add_analyzed_field(CONTENTS, FieldOptions::TEXT, analyzer.clone())
        .add_analyzed_field(FILE_NAME, FieldOptions::TEXT_STORED, analyzer)
        .add_text_field(FULL_PATH, FieldOptions::STORED)
        .add_text_field(MODIFIED, FieldOptions::STORED)
        .build()?)
}

fn load_config(cli: &Cli) -> Result<IndexConfig> {
    let mut config = match &cli.config {
        Some(path) => IndexConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => IndexConfig::default(),
    };
    if let Some(profile) = cli.profile {
        config = config.with_profile(profile);
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(?config, "Loaded configuration");

    match &cli.command {
        Command::Index(args) => {
            let index = Index::open_or_create(&cli.index_dir, schema(args.analyzer)?, config)?;
            index_directory(&index, args)
        }
        Command::Search(args) => {
            let index = open(&cli.index_dir, config)?;
            search(&index, args)
        }
        Command::Delete { doc_ids } => {
            let index = open(&cli.index_dir, config)?;
            let mut writer = index.writer()?;
            for &doc_id in doc_ids {
                if !writer.delete(doc_id)? {
                    warn!(doc_id, "No such document");
                }
            }
            let generation = writer.commit()?;
            println!("committed generation {}", generation);
            Ok(())
        }
        Command::Compact => {
            let index = open(&cli.index_dir, config)?;
            let generation = index.compact(&CancellationToken::new())?;
            println!("compacted to generation {}", generation);
            Ok(())
        }
        Command::Stats => {
            let index = open(&cli.index_dir, config)?;
            print_stats(&index);
            Ok(())
        }
    }
}

fn open(dir: &Path, config: IndexConfig) -> Result<Index> {
    Index::open(dir, config).with_context(|| format!("opening index at {}", dir.display()))
}

fn index_directory(index: &Index, args: &IndexArgs) -> Result<()> {
    let start = Instant::now();
    let mut writer = index.writer()?;
    let (mut indexed, mut skipped) = (0u64, 0u64);

    for entry in WalkDir::new(&args.source).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), &args.extensions) {
            continue;
        }

        let path = entry.path();
        // Invalid UTF-8 is replaced rather than skipped
        let contents = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping file");
                skipped += 1;
                continue;
            }
        };

        let mut doc = Document::new()
            .with_field(CONTENTS, contents)
            .with_field(FILE_NAME, entry.file_name().to_string_lossy())
            .with_field(FULL_PATH, path.to_string_lossy());
        if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
            doc.add_field(MODIFIED, DateTime::<Utc>::from(modified).to_rfc3339());
        }

        let doc_id = writer.add_document(doc)?;
        debug!(doc_id, path = %path.display(), "Indexed file");
        indexed += 1;
    }

    let generation = writer.commit()?;
    info!(
        indexed,
        skipped,
        generation,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Indexing complete"
    );
    println!("indexed {} files into generation {}", indexed, generation);
    Ok(())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}

fn search(index: &Index, args: &SearchArgs) -> Result<()> {
    let start = Instant::now();
    let operator = if args.all {
        MatchOperator::And
    } else {
        MatchOperator::Or
    };
    let tree = QueryParser::new(&args.query)?
        .with_default_field(args.field.as_str())
        .with_default_operator(operator)
        .parse()?;

    let searcher = index.searcher();
    let hits = searcher.search_with_fields(&tree, args.limit)?;
    let total = searcher.count(&tree)?;
    println!(
        "{} of {} hits for {} ({} ms)",
        hits.len(),
        total,
        tree,
        start.elapsed().as_millis()
    );

    let fragments = if args.highlight {
        let highlighter = searcher.highlighter(&args.field)?.with_tags(PRE_TAG, POST_TAG);
        let scored: Vec<_> = hits
            .iter()
            .map(|h| quarry::ScoredDoc {
                doc_id: h.doc_id,
                score: h.score,
            })
            .collect();
        Some(searcher.highlight_hits(&scored, &tree, &args.field, args.fragment_size, &highlighter)?)
    } else {
        None
    };

    for (rank, hit) in hits.iter().enumerate() {
        let path = hit.fields.get(FULL_PATH).unwrap_or("?");
        println!("{:>3}. [{}] {:.4} {}", rank + 1, hit.doc_id, hit.score, path);
        if let Some(fragment) = fragments.as_ref().and_then(|f| f.get(rank)) {
            println!("     {}", fragment.replace('\n', " "));
        }
    }
    Ok(())
}

fn print_stats(index: &Index) {
    let snapshot = index.snapshot();
    println!("path:        {}", index.path().map(|p| p.display().to_string()).unwrap_or_default());
    println!("generation:  {}", snapshot.generation());
    println!("documents:   {}", snapshot.num_docs());
    println!("deleted:     {}", snapshot.deleted_docs());
    println!("segments:    {}", snapshot.segments().len());
    for segment in snapshot.segments() {
        let meta = segment.reader.meta();
        let created = DateTime::<Utc>::from_timestamp_millis(meta.created_at as i64)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!(
            "  {}  docs={} deleted={} bytes={} created={}",
            segment.id(),
            meta.doc_count,
            segment.deleted_count(),
            meta.size_bytes,
            created
        );
    }
}
