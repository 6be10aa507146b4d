use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use itertools::Itertools;
use mimalloc::MiMalloc;
use sccdag_partition::PartitionOptions;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Partition a loop's SCC-DAG into ordered sets that can run as pipeline
/// stages without breaking any dependence.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition the root loop of a program description
    ///
    /// Reads a JSON loop program, condenses its dependences into SCCs,
    /// merges sets that must stay together and writes the final partition
    /// as a JSON report.
    Partition {
        /// Input program JSON (reads stdin if omitted or `-`)
        input: Option<PathBuf>,

        /// Output file path (writes to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip merging loop-carried memory dependences
        #[arg(long)]
        no_loop_carried: bool,

        /// Skip merging LCSSA phis with the values they relay
        #[arg(long)]
        no_lcssa: bool,

        /// Ignore the merge requests listed in the input
        #[arg(long)]
        no_merge_requests: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the report on stdout stays pipeable. Default to
    // warn, allowlist our crates.
    const CRATES: &[&str] = &["sccdag", "sccdag_partition", "sccdag_schemas"];
    let level = cli.verbose.tracing_level_filter();
    let allowlist = CRATES.iter().map(|c| format!("{c}={level}")).join(",");
    let filter = EnvFilter::new(format!("warn,{allowlist}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .init();

    match cli.command {
        Commands::Partition {
            input,
            output,
            no_loop_carried,
            no_lcssa,
            no_merge_requests,
        } => {
            let options = PartitionOptions {
                merge_loop_carried: !no_loop_carried,
                merge_lcssa: !no_lcssa,
                merge_requests: !no_merge_requests,
            };

            let stdin = std::io::stdin();
            let reader: Box<dyn Read> = match input {
                Some(path) if path.as_os_str() != "-" => {
                    let file = File::open(&path).with_context(|| {
                        format!("failed to open {}", path.display())
                    })?;
                    Box::new(BufReader::new(file))
                }
                _ => Box::new(stdin.lock()),
            };

            // Stdout must outlive the lock, so bind it first.
            let stdout = std::io::stdout();
            let mut writer: Box<dyn Write> = match output {
                Some(path) => {
                    let file = File::create(&path).with_context(|| {
                        format!("failed to create {}", path.display())
                    })?;
                    Box::new(BufWriter::new(file))
                }
                None => Box::new(stdout.lock()),
            };

            sccdag_partition::run(reader, &mut *writer, &options)?;
            writer.flush()?;
            Ok(())
        }
    }
}
