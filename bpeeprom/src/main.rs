mod cli;
mod config;
mod config_exec;
mod progress;
mod serial;

use anyhow::{Context, Result, anyhow};
use bpeeprom_lib::buspirate::SerialFactory;
use bpeeprom_lib::request::EepromModel;
use bpeeprom_lib::sim::SimulatedBus;
use bpeeprom_lib::{AdapterFactory, ByteImage, OperationController};
use clap::Parser;
use std::process;
use std::sync::Arc;

use crate::cli::{Cli, CommandSource, Commands, MergedConfig, get_command_source, merge_config};
use crate::config::BpConfig;
use crate::config_exec::Action;
use crate::progress::create_event_view;

fn load_config(args: &Cli) -> Result<Option<BpConfig>> {
    let Some(path) = args.config.as_deref() else {
        return Ok(None);
    };
    let config = BpConfig::from_file(path)
        .map_err(|e| anyhow!("Failed to load config file {}: {}", path, e))?;
    config
        .validate()
        .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
    Ok(Some(config))
}

fn print_ports() -> Result<()> {
    let ports = serial::list_ports()?;
    if ports.is_empty() {
        println!("No ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn adapter_factory(merged: &MergedConfig) -> Result<Arc<dyn AdapterFactory>> {
    if merged.simulate {
        return Ok(Arc::new(SimulatedBus::new(
            merged.size.bytes(),
            merged.page_size,
        )));
    }
    // Check if the specified serial port exists, exit early if not
    serial::check_port_available(&merged.port)?;
    Ok(Arc::new(SerialFactory))
}

fn run(action: Action, merged: &MergedConfig) -> Result<()> {
    let (job, session) = action.prepare(merged)?;
    tracing::debug!(
        "Starting {} of {} bytes at {}",
        job.kind,
        job.layout.total_size(),
        job.address
    );

    let controller = OperationController::new(adapter_factory(merged)?);
    let handle = controller.start(job, session)?;

    let mut view = create_event_view(action.kind(), merged.quiet);
    let result = handle.wait_with(|event| view.on_event(event));

    if !result.outcome.success() {
        return Err(anyhow!("{}", result.outcome.message));
    }
    if !merged.quiet {
        println!("{}", result.outcome.message);
    }

    if let Action::Read { output, print } = action {
        let image = ByteImage::from_bytes(result.data.unwrap_or_default());
        if let Some(path) = output {
            image
                .write_file(&path)
                .with_context(|| format!("Failed to save image to {}", path))?;
            if !merged.quiet {
                println!("Saved {} bytes to {}", image.len(), path);
            }
        }
        if print {
            print!("{}", image.hex_dump());
        }
    }

    Ok(())
}

fn try_main(args: Cli) -> Result<()> {
    match args.command {
        Some(Commands::Ports) => return print_ports(),
        Some(Commands::Sizes) => {
            for line in EepromModel::catalog() {
                println!("{}", line);
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&args)?;
    let action = match get_command_source(&args, config.clone())? {
        CommandSource::Cli(command) => {
            Action::from_command(&command).ok_or_else(|| anyhow!("Not a device command"))?
        }
        CommandSource::Config(config) => Action::from_config(&config)?,
    };

    let mut merged = merge_config(&args, config)?;
    // On macOS, convert /dev/tty.* to /dev/cu.*
    merged.port = serial::normalize_port_name(&merged.port);

    run(action, &merged)
}

fn main() {
    // Initialize tracing, set log level from environment variable
    // Log level can be controlled by setting the RUST_LOG environment variable, e.g.:
    // RUST_LOG=debug, RUST_LOG=bpeeprom_lib=trace, RUST_LOG=info
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Cli::parse();

    if let Err(e) = try_main(args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
