use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use vintner_core::error::ExitCode;
use vintner_core::{CoreError, DedupConfig, Record};
use vintner_dedup::{
    BatchReport, BlockingEngine, DedupError, DedupOrchestrator, Preparer, PriceVariationResolver,
    ResolutionSink, ResolvedGroup, SkipReason,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "vintner",
    about = "Find duplicate catalog records across scraped sources",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format.
    /// Also enabled by setting VINTNER_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of the standard location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate a JSON array of records.
    Dedup {
        input: PathBuf,
        /// Write the full report to this file.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Stream resolved groups to stdout as JSON lines, paced in batches.
        #[arg(long)]
        emit: bool,
    },

    /// Show normalized keys and variant facets for product names.
    Normalize {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show how a record file would be blocked.
    Blocks {
        input: PathBuf,
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Analyze price spread across records sharing a normalized name.
    Prices { input: PathBuf },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config.
    Show,
    /// Print the config file location.
    Path,
    /// Write the default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => err.exit(),
            _ => {
                let _ = err.print();
                std::process::exit(ExitCode::InvalidArgs as i32);
            }
        },
    };

    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code_for(&err) as i32);
    }
}

fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();
    let json_output = cli.json || std::env::var("VINTNER_JSON").as_deref() == Ok("1");
    let config_path = cli.config.clone().unwrap_or_else(DedupConfig::config_path);

    match cli.command {
        // ── Dedup ──────────────────────────────────────────────────────────
        Commands::Dedup {
            input,
            output,
            emit,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let orchestrator = DedupOrchestrator::new(config)?;
            let records = read_records(&input)?;
            let report = orchestrator.run(&records);

            if let Some(path) = &output {
                let file = File::create(path)
                    .with_context(|| format!("cannot create {}", path.display()))?;
                serde_json::to_writer_pretty(BufWriter::new(file), &report)?;
                debug!("report written to {}", path.display());
            }

            if emit {
                let stdout = std::io::stdout();
                let mut sink = JsonLinesSink::new(stdout.lock());
                orchestrator.deliver(&report, &mut sink)?;
            } else if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": report,
                    "meta": { "duration_ms": start.elapsed().as_millis() }
                }))?;
            } else {
                print_report(&report);
            }
        }

        // ── Normalize ──────────────────────────────────────────────────────
        Commands::Normalize { names } => {
            let config = load_config(cli.config.as_deref())?;
            let preparer = Preparer::new(&config.normalization);
            let items: Vec<serde_json::Value> = names
                .iter()
                .map(|name| {
                    serde_json::json!({
                        "name": name,
                        "keys": preparer.normalizer().normalize(name),
                        "variant": vintner_dedup::extract_variant(name),
                    })
                })
                .collect();

            if json_output {
                print_json(&serde_json::json!({"status": "ok", "data": items}))?;
            } else {
                for name in &names {
                    let keys = preparer.normalizer().normalize(name);
                    println!("{name}");
                    println!("  standard:         {}", keys.standard);
                    println!("  aggressive:       {}", keys.aggressive);
                    println!("  ultra-aggressive: {}", keys.ultra_aggressive);
                    let variant = vintner_dedup::extract_variant(name);
                    if variant != Default::default() {
                        println!("  variant:          {}", serde_json::to_string(&variant)?);
                    }
                }
            }
        }

        // ── Blocks ─────────────────────────────────────────────────────────
        Commands::Blocks { input, top } => {
            let config = load_config(cli.config.as_deref())?;
            let records = read_records(&input)?;
            let engine =
                BlockingEngine::new(config.blocking, Preparer::new(&config.normalization));
            let result = engine.create_blocks_with_metrics(&records);

            let mut largest: Vec<_> = result.blocks.values().collect();
            largest.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.key.cmp(&b.key)));
            largest.truncate(top);

            if json_output {
                let blocks: Vec<serde_json::Value> = largest
                    .iter()
                    .map(|block| serde_json::json!({"key": block.key.to_string(), "size": block.len()}))
                    .collect();
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "metrics": result.metrics, "largest_blocks": blocks }
                }))?;
            } else {
                let m = &result.metrics;
                println!("Records:      {}", m.records_processed);
                println!("Blocks:       {}", m.blocks_created);
                println!(
                    "Comparisons:  {} of {} ({:.1}% avoided)",
                    m.comparisons, m.brute_force_comparisons, m.comparisons_avoided_pct
                );
                println!(
                    "Mode:         {}",
                    if m.used_progressive {
                        format!("progressive, {} chunks", m.chunks_processed)
                    } else {
                        "single pass".to_string()
                    }
                );
                println!("Time:         {:.1} ms", m.total_time_ms);
                for (kind, count) in &m.block_type_distribution {
                    println!("  {kind:<10} {count}");
                }
                if !largest.is_empty() {
                    println!("\nLargest blocks:");
                    for block in largest {
                        println!("  {:>6}  {}", block.len(), block.key);
                    }
                }
            }
        }

        // ── Prices ─────────────────────────────────────────────────────────
        Commands::Prices { input } => {
            let config = load_config(cli.config.as_deref())?;
            let records = read_records(&input)?;
            let preparer = Preparer::new(&config.normalization);
            let resolver = PriceVariationResolver::new(config.price);
            let groups = resolver.analyze_by_key(preparer.normalizer(), &records);
            let analyzed: Vec<_> = groups.iter().map(|(_, group)| group.clone()).collect();
            let summary = resolver.summarize(&analyzed);

            if json_output {
                let items: Vec<serde_json::Value> = groups
                    .iter()
                    .map(|(key, group)| serde_json::json!({"key": key, "group": group}))
                    .collect();
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "summary": summary, "groups": items }
                }))?;
            } else {
                for (key, group) in &groups {
                    let spread = group
                        .stats
                        .map(|s| format!("{:.2}-{:.2}, cv {:.2}", s.min, s.max, s.coefficient_of_variation))
                        .unwrap_or_else(|| "no prices".to_string());
                    println!("{key:<40}  {spread:<28}  {}", group.action.as_str());
                }
                println!(
                    "\n{} groups, {} with high variation, mean cv {:.3}",
                    summary.total_groups,
                    summary.high_variation_groups,
                    summary.average_coefficient_of_variation
                );
            }
        }

        // ── Config ─────────────────────────────────────────────────────────
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(cli.config.as_deref())?;
                if json_output {
                    print_json(&serde_json::json!({"status": "ok", "data": config}))?;
                } else {
                    println!("{}\n", config.summary());
                    print!("{}", toml::to_string_pretty(&config)?);
                }
            }
            ConfigAction::Path => {
                if json_output {
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "data": { "path": config_path, "exists": config_path.exists() }
                    }))?;
                } else {
                    println!("{}", config_path.display());
                }
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    bail!(
                        "{} already exists, use --force to overwrite",
                        config_path.display()
                    );
                }
                DedupConfig::default().save_to(&config_path)?;
                if json_output {
                    print_json(&serde_json::json!({"status": "ok", "data": {"path": config_path}}))?;
                } else {
                    println!("Wrote {}", config_path.display());
                }
            }
        },
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("VINTNER_LOG").unwrap_or_else(|_| EnvFilter::new("vintner=info"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    });
}

fn load_config(path: Option<&Path>) -> Result<DedupConfig> {
    let config = match path {
        Some(path) => {
            let mut config = DedupConfig::load_from(path)?;
            config.apply_env_overrides()?;
            config.validate()?;
            config
        }
        None => DedupConfig::load()?,
    };
    Ok(config)
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let records: Vec<Record> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("{} is not a JSON array of records", path.display()))?;
    debug!("read {} records from {}", records.len(), path.display());
    Ok(records)
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn print_report(report: &BatchReport) {
    let stats = &report.stats;
    match &report.skipped {
        Some(SkipReason::Disabled) => {
            println!("Deduplication is disabled in the config.");
            return;
        }
        Some(SkipReason::BelowThreshold { accepted, required }) => {
            println!("Skipped: {accepted} valid records, at least {required} required.");
            return;
        }
        None => {}
    }

    println!(
        "Processed {} records ({} accepted, {} rejected) in {:.0} ms",
        stats.input_records, stats.accepted_records, stats.rejected_records, stats.elapsed_ms
    );
    if report.stages.fuzzy_skipped_over_limit {
        println!("Fuzzy matching skipped: batch exceeds the fuzzy match limit.");
    }
    println!(
        "Duplicate groups: {} ({} auto-merge, {} review)",
        stats.groups, stats.auto_merge, stats.manual_review
    );
    for resolved in &report.groups {
        let duplicates: Vec<&str> = resolved
            .group
            .duplicates()
            .iter()
            .map(|id| id.as_str())
            .collect();
        println!(
            "  {} <- {}  (similarity {:.2}, {})",
            resolved.group.primary,
            duplicates.join(", "),
            resolved.group.average_similarity,
            resolved.price.action.as_str()
        );
    }
    for rejection in &report.rejected {
        println!("  rejected {}: {}", rejection.id, rejection.reason);
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    let invalid_config = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DedupError>(),
            Some(DedupError::InvalidThreshold { .. }) | Some(DedupError::Core(CoreError::Config(_)))
        ) || matches!(cause.downcast_ref::<CoreError>(), Some(CoreError::Config(_)))
    });
    if invalid_config {
        ExitCode::InvalidArgs
    } else {
        ExitCode::GeneralError
    }
}

/// Writes each resolved group as one JSON line.
struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> ResolutionSink for JsonLinesSink<W> {
    fn accept(&mut self, batch: &[ResolvedGroup]) -> vintner_dedup::Result<()> {
        for group in batch {
            serde_json::to_writer(&mut self.writer, group)
                .map_err(|e| DedupError::Sink(e.to_string()))?;
            writeln!(self.writer).map_err(|e| DedupError::Sink(e.to_string()))?;
        }
        self.writer
            .flush()
            .map_err(|e| DedupError::Sink(e.to_string()))
    }
}
