use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use qkg_core::config::{DEFAULT_GRAPH_URI, DEFAULT_GRAPH_USER, DEFAULT_VOCAB_DIR};
use qkg_core::ingest::{BatchPipeline, BatchSummary, FileOutcome, FileReport};
use qkg_core::{GraphConfig, InputKind, PipelineConfig};

#[derive(Parser)]
#[command(
    name = "qkg",
    about = "Import anomaly and test-case spreadsheets into the quality knowledge graph",
    version
)]
struct Cli {
    /// Spreadsheet file or directory of spreadsheets
    #[arg(short, long)]
    input: PathBuf,
    /// Record kind: anomalies, testcases or auto (detect from file name)
    #[arg(short = 't', long = "type", default_value = "auto")]
    kind: InputKind,
    /// Graph store URI (sqlite:<path>, bolt://, neo4j://, neo4j+s://)
    #[arg(long, env = "QKG_GRAPH_URI", default_value = DEFAULT_GRAPH_URI)]
    graph_uri: String,
    #[arg(long, env = "QKG_GRAPH_USER", default_value = DEFAULT_GRAPH_USER)]
    graph_user: String,
    #[arg(long, env = "QKG_GRAPH_PASSWORD", default_value = "", hide_env_values = true)]
    graph_password: String,
    /// Directory holding components.csv, symptoms.csv and causes.csv
    #[arg(long, env = "QKG_VOCAB_DIR", default_value = DEFAULT_VOCAB_DIR)]
    vocab_dir: PathBuf,
    /// JSON file overriding the header aliases per field
    #[arg(long)]
    mapping: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qkg=info,qkg_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::default()
        .with_vocab_dir(&cli.vocab_dir)
        .with_input_kind(cli.kind);
    if let Some(path) = &cli.mapping {
        config = config.with_mapping_file(path)?;
    }

    let graph_config =
        GraphConfig::new(&cli.graph_uri).with_credentials(&cli.graph_user, &cli.graph_password);
    let store = qkg_core::connect(&graph_config)
        .await
        .with_context(|| format!("cannot open graph store {}", cli.graph_uri))?;
    tracing::debug!("Connected to {} backend", store.backend());

    let pipeline = BatchPipeline::from_config(&config, store)?;
    let summary = pipeline.run(&cli.input, config.input_kind).await?;

    print_summary(&summary);
    Ok(())
}

fn print_file(report: &FileReport) {
    let status = match &report.outcome {
        FileOutcome::Committed => "ok".to_string(),
        FileOutcome::ParseFailure(e) => format!("parse failed: {e}"),
        FileOutcome::WriteFailure => "write failed".to_string(),
    };
    println!("{} [{}] {}", report.path.display(), report.kind, status);

    let c = &report.counts;
    println!(
        "  rows: {}  skipped: {}  success: {}  failed: {}",
        c.parsed, c.skipped, c.success, c.failed
    );
    if let Some(extraction) = &report.extraction {
        println!(
            "  extracted: {} nodes, {} relations ({} failed)",
            extraction.nodes, extraction.edges, extraction.failed_edges
        );
    }
}

fn print_summary(summary: &BatchSummary) {
    for report in &summary.files {
        print_file(report);
    }

    let t = &summary.totals;
    println!();
    println!(
        "Files: {} ({} committed, {} failed)",
        summary.files.len(),
        summary.committed,
        summary.failed_files()
    );
    println!(
        "Rows: {} parsed, {} skipped, {} success, {} failed",
        t.parsed, t.skipped, t.success, t.failed
    );

    if !summary.label_counts.is_empty() {
        println!("Nodes by label:");
        for entry in &summary.label_counts {
            println!("  {}: {}", entry.label, entry.count);
        }
    }
}
