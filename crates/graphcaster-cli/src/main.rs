//! Graphcaster CLI
//!
//! Command-line interface for:
//! - Validating schema files and compiling their resource pipelines
//! - Ingesting document files into graph batches (`.jsonl` output)

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use graphcaster_engine::{
    ActorTree, Caster, ConflictPolicy, FilePattern, IngestionParams, JsonFileSource, JsonlWriter,
    NullWriter, TransformRegistry,
};
use graphcaster_schema::Schema;

#[derive(Parser)]
#[command(name = "graphcaster")]
#[command(
    author,
    version,
    about = "Graphcaster: schema-driven document-to-graph casting"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schema file and compile its resource pipelines.
    Validate {
        /// Schema YAML file
        schema: PathBuf,
        /// Only compile this resource (default: all)
        #[arg(short, long)]
        resource: Option<String>,
        /// Print the normalized schema back as YAML
        #[arg(long)]
        canonical: bool,
    },

    /// Cast documents through a resource pipeline into a graph batch file.
    Ingest(IngestArgs),
}

#[derive(Args)]
struct IngestArgs {
    /// Schema YAML file
    schema: PathBuf,
    /// Resource pipeline to apply
    #[arg(short, long)]
    resource: String,
    /// Directory to scan for input documents
    #[arg(short, long)]
    input: PathBuf,
    /// File-name regex (repeatable; default: json and jsonl files)
    #[arg(short, long)]
    pattern: Vec<String>,
    /// Output graph batch file (.jsonl), required unless --dry
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Walk and count without writing
    #[arg(long)]
    dry: bool,
    /// Documents per batch
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,
    /// Worker threads per batch
    #[arg(long, default_value_t = 1)]
    workers: usize,
    /// Cap on documents taken from the source
    #[arg(long)]
    max_items: Option<usize>,
    /// Cap on matched input files
    #[arg(long)]
    limit_files: Option<usize>,
    /// Truncate previous output before writing
    #[arg(long)]
    clean_start: bool,
    /// Drop vertices no edge touches
    #[arg(long)]
    discard_disconnected: bool,
    /// What to do when merged vertices disagree on a property
    #[arg(long, value_enum, default_value_t = ConflictArg::LastWins)]
    conflict: ConflictArg,
    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConflictArg {
    LastWins,
    FirstWins,
    Error,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::LastWins => ConflictPolicy::LastWins,
            ConflictArg::FirstWins => ConflictPolicy::FirstWins,
            ConflictArg::Error => ConflictPolicy::Error,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Validate {
            schema,
            resource,
            canonical,
        } => cmd_validate(&schema, resource.as_deref(), canonical),
        Commands::Ingest(args) => cmd_ingest(args),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_validate(path: &PathBuf, resource: Option<&str>, canonical: bool) -> Result<()> {
    let schema = Schema::from_yaml_file(path)
        .with_context(|| format!("failed to load schema from {}", path.display()))?;

    let registry = TransformRegistry::with_builtins();
    let names: Vec<&str> = match resource {
        Some(name) => vec![name],
        None => schema
            .resources
            .iter()
            .map(|r| r.resource_name.as_str())
            .collect(),
    };
    for name in &names {
        let res = schema
            .fetch_resource(name)
            .with_context(|| format!("resource '{name}' not found"))?;
        ActorTree::compile(res, &schema, &registry)
            .with_context(|| format!("resource '{name}' failed to compile"))?;
    }

    eprintln!(
        "{} {} ({} vertices, {} edges, {} resources compiled)",
        "ok".green().bold(),
        path.display().to_string().bold(),
        schema.vertex_config.vertices.len(),
        schema.edge_config.edges.len(),
        names.len(),
    );
    if canonical {
        println!("{}", schema.to_yaml_string()?);
    }
    Ok(())
}

fn cmd_ingest(args: IngestArgs) -> Result<()> {
    let schema = Schema::from_yaml_file(&args.schema)
        .with_context(|| format!("failed to load schema from {}", args.schema.display()))?;

    let pattern_strs = if args.pattern.is_empty() {
        vec![r"\.jsonl?$".to_string()]
    } else {
        args.pattern.clone()
    };
    let patterns = pattern_strs
        .iter()
        .map(|p| FilePattern::new(p).with_context(|| format!("bad pattern '{p}'")))
        .collect::<Result<Vec<_>>>()?;
    let source = JsonFileSource::new(&args.input, patterns).with_limit_files(args.limit_files);

    let params = IngestionParams {
        batch_size: args.batch_size,
        workers: args.workers,
        max_items: args.max_items,
        dry: args.dry,
        clean_start: args.clean_start,
        conflict_policy: args.conflict.into(),
        discard_disconnected: args.discard_disconnected,
    };
    let caster = Caster::new(&schema).with_params(params);

    let summary = if args.dry {
        let mut writer = NullWriter::new();
        caster.ingest(&args.resource, &source, &mut writer)?
    } else {
        let Some(out) = &args.out else {
            bail!("--out is required unless --dry is set");
        };
        let mut writer = JsonlWriter::create(out)
            .with_context(|| format!("failed to open {}", out.display()))?;
        caster.ingest(&args.resource, &source, &mut writer)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let status = if summary.write_failures == 0 {
            "ok".green().bold()
        } else {
            "partial".yellow().bold()
        };
        eprintln!(
            "{} {}: {} docs, {} vertices, {} edges, {} dropped, {} write failures",
            status,
            args.resource.bold(),
            summary.docs,
            summary.vertices,
            summary.edges,
            summary.dropped,
            summary.write_failures,
        );
        if let Some(out) = &args.out {
            if !args.dry {
                eprintln!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
            }
        }
    }
    Ok(())
}
