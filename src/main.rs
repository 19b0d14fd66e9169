//! Streaming Dataflow Pipeline Compiler CLI
//!
//! Usage:
//!   dfcodegen pipeline.json
//!   dfcodegen pipeline.json --target xilinx --out build/sd --rewrite-device
//!   dfcodegen pipeline.json --json

use clap::Parser as ClapParser;
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dataflow_codegen::{
    ArtifactOutcome, CodegenResult, GenerationReport, Pipeline, PipelineSpec, RewriteOptions,
    Target, TransferMode,
};

#[derive(ClapParser, Debug)]
#[command(name = "dfcodegen")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Generates FPGA sources for streaming dataflow pipelines")]
struct Args {
    /// JSON pipeline description
    #[arg(value_name = "PIPELINE")]
    spec: PathBuf,

    /// Override the target backend (intel, xilinx)
    #[arg(short = 't', long = "target")]
    target: Option<Target>,

    /// Override the destination directory
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Override the directory of hand-written artifacts
    #[arg(short = 'c', long = "codebase")]
    codebase: Option<PathBuf>,

    /// Directory of user templates
    #[arg(long = "templates")]
    templates: Option<PathBuf>,

    /// Override the transfer mode (copy, shared, host)
    #[arg(long = "transfer-mode")]
    transfer_mode: Option<TransferMode>,

    /// Generate device sources only
    #[arg(long = "device", conflicts_with = "host_only")]
    device_only: bool,

    /// Generate host sources only
    #[arg(long = "host")]
    host_only: bool,

    /// Rewrite every artifact
    #[arg(long = "rewrite")]
    rewrite: bool,

    /// Rewrite aggregated device sources
    #[arg(long = "rewrite-device")]
    rewrite_device: bool,

    /// Rewrite per-operator compute functions
    #[arg(long = "rewrite-functions")]
    rewrite_functions: bool,

    /// Rewrite type definitions
    #[arg(long = "rewrite-tuples")]
    rewrite_tuples: bool,

    /// Rewrite the host program
    #[arg(long = "rewrite-host")]
    rewrite_host: bool,

    /// Rewrite host pipeline wiring
    #[arg(long = "rewrite-pipe")]
    rewrite_pipe: bool,

    /// Rewrite key-extraction lambdas
    #[arg(long = "rewrite-keyby")]
    rewrite_keyby: bool,

    /// Print the resolved graph as JSON instead of generating
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            all: self.rewrite,
            device: self.rewrite_device,
            functions: self.rewrite_functions,
            tuples: self.rewrite_tuples,
            host: self.rewrite_host,
            pipe: self.rewrite_pipe,
            keyby: self.rewrite_keyby,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load(args: &Args) -> CodegenResult<Pipeline> {
    let mut spec = PipelineSpec::load(&args.spec)?;
    if let Some(target) = args.target {
        spec.config.target = target;
    }
    if let Some(out) = &args.out {
        spec.config.dest_dir = out.clone();
    }
    if let Some(codebase) = &args.codebase {
        spec.config.codebase = Some(codebase.clone());
    }
    if let Some(templates) = &args.templates {
        spec.config.templates = Some(templates.clone());
    }
    if let Some(mode) = args.transfer_mode {
        spec.config.transfer_mode = mode;
    }
    Pipeline::from_spec(&spec)
}

fn run(args: &Args) -> CodegenResult<()> {
    let mut pipeline = load(args)?;

    if args.json_output {
        pipeline.finalize()?;
        println!("{}", pipeline.to_json()?);
        return Ok(());
    }

    let rewrite = args.rewrite_options();
    let report = if args.device_only {
        pipeline.generate_device(&rewrite)?
    } else if args.host_only {
        pipeline.generate_host(&rewrite)?
    } else {
        pipeline.generate_code(&rewrite)?
    };

    print_report(&pipeline, &report, args.verbose > 0);
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn print_report(pipeline: &Pipeline, report: &GenerationReport, verbose: bool) {
    let config = pipeline.config();
    println!("{}", "Generation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}: {}", "Pipeline".cyan(), pipeline.name());
    println!("{}: {}", "Target".cyan(), config.target);
    println!("{}: {}", "Output".cyan(), config.dest_dir.display());
    println!(
        "{}: {}",
        "Operators".cyan(),
        pipeline
            .nodes()
            .iter()
            .map(|n| format!("{} (x{})", n.name, n.parallelism))
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    println!();

    for record in &report.artifacts {
        let skipped = record.outcome == ArtifactOutcome::Skipped;
        if skipped && !verbose {
            continue;
        }
        let outcome = match record.outcome {
            ArtifactOutcome::Generated => record.outcome.to_string().green(),
            ArtifactOutcome::Copied => record.outcome.to_string().yellow(),
            ArtifactOutcome::Skipped => record.outcome.to_string().dimmed(),
        };
        let path = record
            .path
            .strip_prefix(&config.dest_dir)
            .unwrap_or(&record.path);
        println!("  {:>9}  {}", outcome, path.display());
    }

    println!();
    println!(
        "{} generated, {} copied, {} kept",
        report.count(ArtifactOutcome::Generated),
        report.count(ArtifactOutcome::Copied),
        report.count(ArtifactOutcome::Skipped)
    );
    if !verbose && report.count(ArtifactOutcome::Skipped) > 0 {
        println!("(existing artifacts kept, use -v to list them or --rewrite to regenerate)");
    }
}
