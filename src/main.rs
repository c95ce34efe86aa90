use std::{panic, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;

use sigen_gateway::catalog;
use sigen_gateway::config::{self, InstallationConfig};
use sigen_gateway::coordinator::{IntegratorDefinition, PollingCoordinator};
use sigen_gateway::derived::{Formula, Transform};
use sigen_gateway::hub::ModbusHub;
use sigen_gateway::integration::{ResetPolicy, DEFAULT_MAX_GAP};
use sigen_gateway::pool::ConnectionPool;
use sigen_gateway::service::ServiceHandle;
use sigen_gateway::writer::ParameterWriter;

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
            .or_else(|| panic_info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("<cause unknown>");

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn default_integrators() -> Vec<IntegratorDefinition> {
    vec![
        IntegratorDefinition {
            source_sensor_key: "grid_import_kwh".to_string(),
            source: Transform::Formula(Formula::GridImportKw),
            reset_policy: ResetPolicy::DailyLocalMidnight,
            round_digits: 4,
            max_gap: DEFAULT_MAX_GAP,
        },
        IntegratorDefinition {
            source_sensor_key: "grid_export_kwh".to_string(),
            source: Transform::Formula(Formula::GridExportKw),
            reset_policy: ResetPolicy::DailyLocalMidnight,
            round_digits: 4,
            max_gap: DEFAULT_MAX_GAP,
        },
        IntegratorDefinition {
            source_sensor_key: "consumed_kwh".to_string(),
            source: Transform::Formula(Formula::ConsumedKw),
            reset_policy: ResetPolicy::DailyLocalMidnight,
            round_digits: 4,
            max_gap: DEFAULT_MAX_GAP,
        },
    ]
}

fn print_value<T: serde::Serialize + std::fmt::Debug>(value: &T, no_json: bool) -> Result<()> {
    if no_json {
        println!("{value:?}");
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::Args::parse();
    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = InstallationConfig::load(&args.config)
        .with_context(|| format!("cannot load configuration from {:?}", args.config))?;

    let pool = ConnectionPool::tcp();
    let hub = ModbusHub::new(pool, config.plant_connection.read_only);

    let plant = sigen_gateway::device::DeviceRecord {
        kind: sigen_gateway::device::DeviceKind::Plant,
        logical_name: String::new(),
        endpoint: config.plant_endpoint(),
        unit_id: config.plant_connection.unit_id,
        has_dc_charger: false,
    };
    let devices = config.device_records();

    let (refresh_tx, refresh_rx) = tokio::sync::mpsc::unbounded_channel();
    let writer = ParameterWriter::new(Arc::clone(&hub)).with_refresh_channel(refresh_tx);

    let persisted_states = config::load_integrator_states(&args.state)
        .with_context(|| format!("cannot load integrator state from {:?}", args.state))?;
    debug!("loaded {} persisted integrator state(s)", persisted_states.len());

    let (mut coordinator, snapshot_rx) = PollingCoordinator::new(
        Arc::clone(&hub),
        plant,
        devices,
        config.plant_connection.scan_intervals.clone(),
        default_integrators(),
        refresh_rx,
        config.local_timezone(),
        &persisted_states,
        Some(args.state.clone()),
    )
    .with_context(|| "invalid scan interval configuration")?;

    let service = ServiceHandle::new(hub, snapshot_rx, writer, &config);

    match &args.command {
        commandline::Commands::Daemon => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("received ctrl-c, shutting down");
                let _ = shutdown_tx.send(());
            });
            info!("starting polling coordinator");
            coordinator.run(shutdown_rx).await;
        }
        commandline::Commands::GetSnapshot => {
            let snapshot = coordinator
                .poll_once()
                .await
                .with_context(|| "cannot produce a snapshot")?;
            print_value(&snapshot, args.no_json)?;
        }
        commandline::Commands::ListDevices => {
            let devices: Vec<String> = service.list_devices().iter().map(|d| d.to_string()).collect();
            print_value(&devices, args.no_json)?;
        }
        commandline::Commands::ListRegisters { device_kind } => {
            let names: Vec<&str> = catalog::capability_set(**device_kind)
                .iter()
                .map(|d| d.name)
                .collect();
            print_value(&names, args.no_json)?;
        }
        commandline::Commands::WriteParameter {
            device_kind,
            device,
            register,
            value,
        } => {
            service
                .write_parameter(**device_kind, device.as_deref(), register, *value)
                .await
                .with_context(|| format!("cannot write '{register}'"))?;
            println!("wrote {value} to '{register}'");
        }
        commandline::Commands::Identify { host, port, unit_id } => {
            let identification = service.identify(host, *port, *unit_id).await;
            println!("{identification}");
        }
    }

    Ok(())
}
