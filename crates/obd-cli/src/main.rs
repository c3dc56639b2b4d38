//! ELM327 diagnostic client - command line entry point

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Args, Commands};
use obd_link::mock::{MockConnector, MockTransport};
use obd_link::serial::SerialConnector;
use obd_link::Connector;
use obd_protocol::battery::BatteryReport;
use obd_protocol::{dtc, FreezeFrame, Odometer, SensorSnapshot};
use obd_session::{
    BatteryStage, DeviceStore, JsonDeviceStore, PerformanceResult, Session, SessionConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Last device file when the configuration names none
const DEFAULT_DEVICE_STORE: &str = "obd-last-device.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = SessionConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(brand) = args.brand {
        config.session.brand = brand;
    }
    let store_path = config
        .session
        .device_store
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_STORE));
    let store: Arc<dyn DeviceStore> = Arc::new(JsonDeviceStore::new(store_path));

    let (connector, mock_device): (Arc<dyn Connector>, Option<String>) = if args.mock {
        let connector = MockConnector::new(MockTransport::new());
        let id = connector.device_id().to_string();
        (Arc::new(connector), Some(id))
    } else {
        (Arc::new(SerialConnector::new(config.serial.baud_rate)), None)
    };

    info!("=== ELM327 diagnostic client v{} ===", env!("CARGO_PKG_VERSION"));
    let session = Session::new(connector, store, config);

    if let Commands::Ports = args.command {
        for device in session.scan().await? {
            println!("{}\t{}", device.id, device.name);
        }
        return Ok(());
    }

    connect(&session, args.device.or(mock_device)).await?;
    let result = run(&session, &args.command, args.json).await;

    if args.show_log {
        for line in session.logs().iter().rev() {
            eprintln!("{line}");
        }
    }
    session.disconnect().await;
    result
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

async fn connect(session: &Session, device: Option<String>) -> anyhow::Result<()> {
    match device {
        Some(id) => session.connect(&id, &id).await?,
        None => session
            .reconnect_last()
            .await
            .context("No --device given and no remembered adapter")?,
    }

    if let Some(adapter) = session.adapter_info() {
        info!("Adapter: {} ({:?})", adapter.banner, adapter.firmware);
    }
    if !session.connection().is_ecu_connected() {
        bail!(session.error().unwrap_or_else(|| "ECU not connected".to_string()));
    }
    Ok(())
}

async fn run(session: &Session, command: &Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Ports => {}
        Commands::Monitor { seconds } => monitor(session, *seconds, json).await?,
        Commands::Diagnose => {
            let snapshot = session.run_diagnostics().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_diagnostics(&snapshot);
            }
        }
        Commands::ClearCodes => {
            session.clear_diagnostics().await?;
            println!("Codes cleared, {} still stored", session.sensors().dtcs.len());
        }
        Commands::Adapt { kind } => {
            session.run_adaptation_routine(*kind).await?;
            println!("{kind:?} adaptation complete");
        }
        Commands::Send { command } => println!("{}", session.send_command(command).await?),
        Commands::FreezeFrame => {
            let frame = session.read_freeze_frame().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&frame)?);
            } else {
                print_freeze_frame(&frame);
            }
        }
        Commands::Battery => {
            let report = session.battery_test(announce).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_battery(&report);
            }
        }
        Commands::Perf { seconds } => {
            println!("Timer armed, launch when ready");
            let result = session.performance_run(Duration::from_secs(*seconds)).await?;
            session.stop_polling();
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_performance(&result);
            }
        }
    }
    Ok(())
}

async fn monitor(session: &Session, seconds: Option<u64>, json: bool) -> anyhow::Result<()> {
    session.start_polling()?;
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let snapshot = session.sensors();
                if json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    print_live(&snapshot);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
            }
        }
    }
    session.stop_polling();
    Ok(())
}

fn announce(stage: BatteryStage) {
    let prompt = match stage {
        BatteryStage::Resting => "Engine off, reading resting voltage...",
        BatteryStage::Cranking => "Crank the engine now",
        BatteryStage::Settling => "Let the engine idle...",
        BatteryStage::Charging => "Reading charging voltage...",
    };
    println!("{prompt}");
}

fn show<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
    value.map_or_else(|| "--".to_string(), |v| format!("{v}{unit}"))
}

fn print_live(s: &SensorSnapshot) {
    println!(
        "rpm {} | speed {} | coolant {} | throttle {} | load {} | iat {} | map {} | battery {}",
        show(s.rpm, ""),
        show(s.speed, " km/h"),
        show(s.coolant_temp, " C"),
        show(s.throttle, "%"),
        show(s.engine_load, "%"),
        show(s.intake_air_temp, " C"),
        show(s.manifold_pressure, " kPa"),
        show(s.battery_voltage, " V"),
    );
}

fn print_diagnostics(s: &SensorSnapshot) {
    println!("VIN:                   {}", s.vin.as_deref().unwrap_or("--"));
    let odometer = match s.odometer {
        Odometer::Km(km) => format!("{km} km"),
        Odometer::Unsupported => "not supported".to_string(),
        Odometer::Unknown => "--".to_string(),
    };
    println!("Odometer:              {odometer}");
    println!("Distance since clear:  {}", show(s.distance_since_cleared, " km"));
    println!("Distance with MIL on:  {}", show(s.distance_mil_on, " km"));
    if s.dtcs.is_empty() {
        println!("No stored trouble codes");
        return;
    }
    println!("Trouble codes:");
    for code in &s.dtcs {
        println!("  {code}  {}", dtc::describe(code).unwrap_or("Unknown code"));
    }
}

fn print_freeze_frame(frame: &FreezeFrame) {
    println!("Freeze frame 0");
    println!("  RPM:     {}", show(frame.rpm, ""));
    println!("  Speed:   {}", show(frame.speed, " km/h"));
    println!("  Coolant: {}", show(frame.coolant_temp, " C"));
}

fn print_performance(result: &PerformanceResult) {
    let time = |t: Option<f64>| t.map_or_else(|| "--".to_string(), |t| format!("{t:.2} s"));
    println!("0-60 km/h:  {}", time(result.t60));
    println!("0-100 km/h: {}", time(result.t100));
}

fn print_battery(report: &BatteryReport) {
    println!("Resting:  {:.2} V  {:?}", report.resting_v, report.resting);
    println!("Cranking: {:.2} V  {:?}", report.cranking_v, report.cranking);
    println!("Charging: {:.2} V  {:?}", report.charging_v, report.charging);
}
