use std::{
    fs::File,
    path::Path,
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};
use anyhow::Context;
use clap::Parser;
use tracing::{ error, info, warn };
use tracing_subscriber::{ fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use boot_sweep::{
    cancel::{ cancel_pair, Cancel },
    classify::BootClassifier,
    config::{ Cli, Command, SupplyArgs, SweepArgs, ToggleArgs },
    link::{
        serial::{ open_stream, SerialPortOpener, SystemPorts },
        LinkAcquirer,
    },
    orchestrator::{ CycleOrchestrator, RunError },
    record::CsvRecorder,
    supply::ScpiSupply,
    toggle::run_toggle,
};

const SUPPLY_OPEN_TIMEOUT: Duration = Duration::from_secs(1);
const INTERRUPTED: u8 = 130;

fn init_logging(log_file: &Path) -> anyhow::Result<()>
{
    let file = File::create(log_file)
        .with_context(|| format!("unable to create log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("unable to install logger")?;

    Ok(())
}

async fn open_supply(args: &SupplyArgs) -> anyhow::Result<ScpiSupply<tokio_serial::SerialStream>>
{
    let stream = open_stream(&args.supply_port, args.supply_baud, SUPPLY_OPEN_TIMEOUT)?;
    let mut supply = ScpiSupply::with(stream).sample_interval(args.sample_interval());

    let identity = supply
        .identify()
        .await
        .with_context(|| format!("supply on {} did not identify itself", args.supply_port))?;
    info!(port = %args.supply_port, %identity, "supply connected");

    Ok(supply)
}

/// Cancels the run on the first Ctrl-C
fn cancel_on_interrupt() -> Cancel
{
    let (handle, cancel) = cancel_pair();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupted, shutting down");
                handle.cancel();
            }
            Err(err) => error!(%err, "unable to listen for interrupts"),
        }
    });

    cancel
}

async fn sweep(args: SweepArgs) -> anyhow::Result<ExitCode>
{
    let plan = args.plan()?;
    let settings = args.settings()?;
    let candidates = args.candidates()?;

    let supply = open_supply(&args.supply).await?;
    let mut recorder = CsvRecorder::create(&args.output_dir).await?;

    let acquirer = LinkAcquirer::new(SerialPortOpener, SystemPorts, candidates, args.baud)
        .reserve(args.supply.supply_port.as_str());
    let classifier = BootClassifier::new(args.markers());
    let mut orchestrator = CycleOrchestrator::new(supply, acquirer, classifier, settings);

    let result = orchestrator.run(&plan, &mut recorder, &cancel_on_interrupt()).await;
    println!("{}", orchestrator.summary());

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(RunError::Cancelled) => Ok(ExitCode::from(INTERRUPTED)),
        Err(err) => Err(err.into()),
    }
}

async fn toggle(args: ToggleArgs) -> anyhow::Result<ExitCode>
{
    let settings = args.settings()?;
    let mut supply = open_supply(&args.supply).await?;

    match run_toggle(&mut supply, &settings, &cancel_on_interrupt()).await {
        Ok(rounds) => {
            info!(rounds, "toggling complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(RunError::Cancelled) => Ok(ExitCode::from(INTERRUPTED)),
        Err(err) => Err(err.into()),
    }
}

#[tokio::main]
async fn main() -> ExitCode
{
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.log_file) {
        eprintln!("{:#}", err);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Sweep(args) => sweep(args).await,
        Command::Toggle(args) => toggle(args).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
