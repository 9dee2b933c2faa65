use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use port_scan_rs::scanner::{self, ProgressSink};
use port_scan_rs::types::ScanRequest;
use port_scan_rs::{report, server, validate};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// port-scan-rs: bounded-concurrency async TCP port scanner with a JSON web API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-scan-rs",
    version,
    about = "Bounded-concurrency async TCP port scanner with a JSON web API and a tiny web UI.",
    long_about = None
)]
struct Cli {
    /// Target host (used when --host is not given).
    #[arg(value_name = "HOST")]
    target: Option<String>,

    /// Target host to scan (IP address or hostname).
    #[arg(long)]
    host: Option<String>,

    /// First port of the range.
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    start: i64,

    /// Last port of the range (inclusive).
    #[arg(long, default_value_t = 1024, allow_negative_numbers = true)]
    end: i64,

    /// Max concurrent TCP connect attempts (non-positive means 100).
    #[arg(long, default_value_t = 100, allow_negative_numbers = true)]
    concurrent: i64,

    /// Connect timeout per port in milliseconds (non-positive means 500).
    #[arg(long = "timeout", default_value_t = 500, allow_negative_numbers = true)]
    timeout_ms: i64,

    /// Print the summary as pretty JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Suppress the progress bar.
    #[arg(long, default_value_t = false)]
    quiet: bool,

    /// Also write results as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run the HTTP API and web UI instead of a one-shot scan.
    #[arg(long, default_value_t = false)]
    web: bool,

    /// Address the web server binds to.
    #[arg(long, env = "PORT_SCAN_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory with the static web UI.
    #[arg(long = "ui-dir", default_value = "ui")]
    ui_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(if cli.web { "info" } else { "warn" });

    if cli.web {
        println!("Server running at http://{} (Ctrl+C to stop)", cli.bind);
        server::serve(&cli.bind, cli.ui_dir, CancellationToken::new()).await?;
        println!("Server has been shut down");
        return Ok(ExitCode::SUCCESS);
    }

    let Some(host) = cli.host.clone().or_else(|| cli.target.clone()) else {
        Cli::command().print_help()?;
        println!();
        return Ok(ExitCode::FAILURE);
    };

    let req = ScanRequest {
        host,
        start_port: cli.start,
        end_port: cli.end,
        max_concurrent: cli.concurrent,
        timeout_ms: cli.timeout_ms,
    };
    let spec = match validate::validate_request(&req).await {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Validation error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    // Ctrl-C cancels the scan.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let show_progress = !cli.json && !cli.quiet;
    let bar = show_progress.then(|| progress_bar(spec.total_ports() as u64));
    let sink = bar.clone().map(|pb| -> ProgressSink {
        Arc::new(move |done: usize, _total: usize| pb.set_position(done as u64))
    });
    if show_progress {
        println!(
            "Starting scan of {} ports on {}...",
            spec.total_ports(),
            spec.host()
        );
    }

    let res = scanner::run_scan_with_cancel(&spec, sink, cancel).await;
    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
    let summary = res?;

    if cli.json {
        println!("{}", report::render_json(&summary)?);
    } else {
        print!("{}", report::render_text(&summary));
    }
    if let Some(path) = cli.output.as_deref() {
        report::write_json(path, &summary)?;
        if !cli.json {
            println!("\nWrote JSON results to {}", path.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "Scanning... {pos}/{len} ports completed ({percent}%) [{bar:30}] {elapsed}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
