use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hybrid_core::persist::{
    load_artifact, load_manifest, save_artifact, save_manifest, AnalysisSettings, BuildManifest, IndexPaths,
    FORMAT_VERSION,
};
use hybrid_core::{analyzer_by_name, Bm25Params, Bm25Scorer, IndexBuilder, LexicalIndex, TextPipeline, TokenFilter};
use tracing_subscriber::{fmt, EnvFilter};

mod source;

use source::JsonDocumentSource;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and inspect the lexical BM25 index artifact", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// Tokenization threads; 0 uses every core
        #[arg(long, default_value_t = 0)]
        workers: usize,
        /// Morphological analyzer
        #[arg(long, default_value = "script")]
        analyzer: String,
        /// Comma-separated categories to index, e.g. common-noun,verb
        #[arg(long, value_delimiter = ',')]
        allow_categories: Vec<String>,
        /// Query run against the reloaded artifact after publishing
        #[arg(long)]
        verify_query: Option<String>,
    },
    /// Print statistics of a built index
    Inspect {
        /// Index directory
        #[arg(long)]
        artifact: String,
        /// Show how this query tokenizes and its document frequencies
        #[arg(long)]
        query: Option<String>,
    },
    /// Rank documents for a query with BM25 only
    Query {
        /// Index directory
        #[arg(long)]
        artifact: String,
        #[arg(long)]
        q: String,
        #[arg(long, default_value_t = 10)]
        k: usize,
        #[arg(long, default_value_t = hybrid_core::bm25::DEFAULT_K1)]
        k1: f64,
        #[arg(long, default_value_t = hybrid_core::bm25::DEFAULT_B)]
        b: f64,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, workers, analyzer, allow_categories, verify_query } => {
            build_index(&input, &output, workers, &analyzer, &allow_categories, verify_query.as_deref())
        }
        Commands::Inspect { artifact, query } => inspect(&artifact, query.as_deref()),
        Commands::Query { artifact, q, k, k1, b } => query(&artifact, &q, k, k1, b),
    }
}

fn build_index(
    input: &str,
    output: &str,
    workers: usize,
    analyzer: &str,
    allow_categories: &[String],
    verify_query: Option<&str>,
) -> Result<()> {
    let filter = if allow_categories.is_empty() {
        TokenFilter::default()
    } else {
        TokenFilter::from_names(allow_categories)?
    };
    let pipeline = TextPipeline::new(analyzer_by_name(analyzer)?, filter);
    let settings = AnalysisSettings::from_pipeline(&pipeline);

    let builder = IndexBuilder::new(pipeline).with_workers(workers);
    let source = JsonDocumentSource::new(input);
    let (index, report) = builder.build_from(&source)?;
    if index.is_empty() {
        tracing::warn!(input, "no document produced any token; publishing an empty index");
    }

    let paths = IndexPaths::new(output);
    let checksum = save_artifact(&paths.artifact(), &index, &settings)
        .with_context(|| format!("writing {}", paths.artifact().display()))?;
    let manifest = BuildManifest {
        version: FORMAT_VERSION,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into()),
        analyzer: settings.analyzer.clone(),
        num_docs: index.document_count(),
        num_skipped: report.skipped.len() + source.rejected(),
        num_terms: index.term_count(),
        avg_doc_len: index.average_document_length(),
        checksum: format!("{checksum:08x}"),
    };
    save_manifest(&paths, &manifest)?;

    verify(&paths, &index, &settings, verify_query)?;

    tracing::info!(
        output,
        indexed = report.indexed,
        skipped = report.skipped.len(),
        rejected = source.rejected(),
        terms = report.terms,
        elapsed_ms = report.elapsed.as_millis() as u64,
        checksum = %manifest.checksum,
        "index build complete"
    );
    Ok(())
}

/// Reload what was just published and make sure it is the index we built.
fn verify(paths: &IndexPaths, built: &LexicalIndex, settings: &AnalysisSettings, sample: Option<&str>) -> Result<()> {
    let loaded = load_artifact(&paths.artifact()).context("published artifact does not load")?;
    if &loaded.index != built || &loaded.settings != settings {
        bail!("published artifact differs from the built index");
    }
    if let Some(q) = sample {
        let pipeline = loaded.settings.pipeline(analyzer_by_name(&loaded.settings.analyzer)?)?;
        let tokens = pipeline.tokenize(q);
        let hits = Bm25Scorer::default().score(&tokens, &loaded.index, 5);
        tracing::info!(query = q, ?tokens, hits = hits.len(), top = ?hits.first().map(|h| &h.doc_id), "verification query");
    }
    tracing::info!(docs = loaded.index.document_count(), "artifact verified");
    Ok(())
}

fn open(dir: &str) -> Result<(LexicalIndex, TextPipeline)> {
    let paths = IndexPaths::new(dir);
    let artifact = load_artifact(&paths.artifact())?;
    let pipeline = artifact.settings.pipeline(analyzer_by_name(&artifact.settings.analyzer)?)?;
    Ok((artifact.index, pipeline))
}

fn inspect(dir: &str, query: Option<&str>) -> Result<()> {
    let (index, pipeline) = open(dir)?;
    if let Ok(manifest) = load_manifest(&IndexPaths::new(dir)) {
        println!("built:     {} (format v{})", manifest.created_at, manifest.version);
        println!("skipped:   {}", manifest.num_skipped);
        println!("checksum:  {}", manifest.checksum);
    }
    println!("analyzer:  {}", pipeline.analyzer_name());
    println!(
        "allowed:   {}",
        pipeline.filter().allowed().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
    );
    println!("documents: {}", index.document_count());
    println!("terms:     {}", index.term_count());
    println!("tokens:    {}", index.total_tokens());
    println!("avgdl:     {:.3}", index.average_document_length());

    if let Some(q) = query {
        for token in pipeline.tokenize(q) {
            println!("{token}\tdf={}", index.document_frequency(&token));
        }
    }
    Ok(())
}

fn query(dir: &str, q: &str, k: usize, k1: f64, b: f64) -> Result<()> {
    let params = Bm25Params::new(k1, b)?;
    let (index, pipeline) = open(dir)?;
    let tokens = pipeline.tokenize(q);
    tracing::debug!(?tokens, "query tokenized");
    for hit in Bm25Scorer::new(params).score(&tokens, &index, k) {
        println!("{}\t{}\t{:.6}", hit.rank, hit.doc_id, hit.score);
    }
    Ok(())
}
