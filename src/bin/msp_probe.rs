use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};

use msp_engine::monitor::stress::{StressConfig, StressTest};
use msp_engine::protocol::message as codes;
use msp_engine::transport::{self, serial, SerialConfig};
use msp_engine::{EngineConfig, QueueMonitor, Result};

/// Connects to a flight controller and dumps what it reports
#[derive(Parser, Debug)]
#[command(name = "msp-probe", version)]
struct Args {
    /// Serial port; lists available ports when omitted
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Engine configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log every frame
    #[arg(short, long)]
    verbose: bool,

    /// Print the queue monitor report at the end
    #[arg(short, long)]
    monitor: bool,

    /// Run the stress scenarios after probing
    #[arg(long)]
    stress: bool,
}

const PROBE_CODES: &[u16] = &[
    codes::FC_VARIANT,
    codes::FC_VERSION,
    codes::BOARD_INFO,
    codes::BUILD_INFO,
    codes::NAME,
    codes::STATUS,
    codes::FEATURE_CONFIG,
];

async fn run(args: Args) -> Result<()> {
    let port = match args.port {
        Some(port) => port,
        None => {
            for name in serial::list_ports()? {
                println!("{}", name);
            }
            return Ok(());
        }
    };

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let connection = transport::connect_serial(&SerialConfig::new(port, args.baud), config).await?;
    let handle = connection.handle;

    let monitor = QueueMonitor::for_engine(&handle);
    monitor.instrument(&handle).await?;
    monitor.start_monitoring(handle.clone(), Duration::from_secs(1));

    for &code in PROBE_CODES {
        if let Err(e) = handle.fetch(code).await {
            warn!(code, error = %e, "Probe request failed");
        }
    }
    let state = handle.state().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    if args.stress {
        let stress = StressTest::with_monitor(handle.clone(), monitor.clone(), StressConfig::default());
        let report = stress.run_all().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if args.monitor {
        let report = monitor.report(&handle.pending().await?);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    monitor.stop_monitoring();
    handle.shutdown().await?;
    info!("Probe finished");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Probe failed");
            ExitCode::FAILURE
        }
    }
}
