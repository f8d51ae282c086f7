// jtrace - trace a JVM method's variables via JDWP
//
// Launches the target class suspended under the debug agent, breaks on
// entry to the requested method, then single-steps it, recording every
// visible variable at every visited line into an XML trace document while
// relaying the target's stdin/stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

mod relay;
mod resolve;
mod session;
mod snapshot;
mod trace;

use session::{Session, TraceSink};

#[derive(Debug, Parser)]
#[command(name = "jtrace", version, about = "Trace a JVM method's variables via JDWP")]
struct Args {
    /// Class to launch and trace, e.g. "Main"
    class_pattern: String,

    /// Method to break on and step through, e.g. "main"
    method_name: String,

    /// Trace document file; written to stdout when omitted
    #[arg(short = 'l', long = "trace", value_name = "TRACE_FILE")]
    trace_file: Option<PathBuf>,

    /// Also record the target's output into this tagged log file
    #[arg(short = 'o', long = "output-log", value_name = "LOG_FILE")]
    output_log: Option<PathBuf>,

    /// Print the analysis banner and debug-level diagnostics
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Diagnostics go to stderr; stdout carries the relayed target output
    // (and the trace document when no trace file is given).
    let default_filter = if args.verbose {
        "jtrace=debug,jdwp_client=debug"
    } else {
        "jtrace=info,jdwp_client=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let trace_sink: TraceSink = match &args.trace_file {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create trace file {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let log_sink = match &args.output_log {
        Some(path) => Some(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create output log {}", path.display()))?,
        ),
        None => None,
    };

    let mut vm = jdwp_client::launch(&args.class_pattern)
        .await
        .context("failed to launch target VM")?;

    if args.verbose {
        let version = vm.connection.version().await?;
        eprintln!(
            "Analyzing {}.{}() on {} ({})",
            args.class_pattern, args.method_name, version.vm_name, version.vm_version
        );
    }

    let mut session = Session::open(
        vm,
        trace_sink,
        log_sink,
        &args.class_pattern,
        &args.method_name,
    )
    .await?;

    let result = session.run().await;

    // Teardown runs on every path so the trace document always closes.
    session.shutdown().await;

    if result.is_ok() {
        info!("trace complete");
        if args.verbose {
            eprintln!("Virtual machine disconnected.");
        }
    }

    result
}
