use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tent_thermostat::counters::{CounterStore, FileCounterStore};
use tent_thermostat::fault::FaultLevel;
use tent_thermostat::records::StatusSnapshot;
use tent_thermostat::sensors::build_sensor_sets;
use tent_thermostat::{ControlLoop, ControllerConfig, ExitReason, HeaterState};
use tracing::{info, Level};

const DEFAULT_CONFIG: &str = "thermostat.toml";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tent-thermostat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Greenhouse tent heater controller")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Tent configuration file")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG)
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log at debug level")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run the control loop (default)")
                .arg(
                    Arg::with_name("cycles")
                        .long("cycles")
                        .value_name("N")
                        .help("Stop after N cycles")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("cycles must be a whole number".into()),
                        }),
                ),
        )
        .subcommand(SubCommand::with_name("detect").about("Enumerate the configured sensors and read them once"))
        .subcommand(
            SubCommand::with_name("status")
                .about("Show the last recorded cycle")
                .arg(Arg::with_name("json").long("json").help("Print the raw snapshot")),
        )
        .subcommand(
            SubCommand::with_name("reset-counters")
                .about("Zero the persisted I/O-error and reboot counters")
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .help("Confirm the reset")
                        .required(true),
                ),
        )
        .subcommand(SubCommand::with_name("check-config").about("Validate the configuration file"))
        .get_matches();

    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG);
    let verbose = matches.is_present("verbose");
    let config = ControllerConfig::load(Path::new(config_path))?;

    match matches.subcommand() {
        ("detect", _) => {
            init_tracing(None, verbose)?;
            handle_detect(&config);
        }
        ("status", Some(sub_matches)) => handle_status(&config, sub_matches)?,
        ("reset-counters", _) => {
            let mut store = FileCounterStore::new(config.paths.state_dir.clone());
            store.reset()?;
            println!("{} Counters reset in {}", "✅".green(), store.path().display());
        }
        ("check-config", _) => handle_check_config(&config, config_path),
        ("run", Some(sub_matches)) => {
            let cycles = sub_matches.value_of("cycles").map(str::parse::<u64>).transpose()?;
            run(config, verbose, cycles).await?;
        }
        _ => run(config, verbose, None).await?,
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt().with_max_level(level).with_target(false);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run(config: ControllerConfig, verbose: bool, cycles: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(config.paths.control_log.as_deref(), verbose)?;

    let mut control = ControlLoop::from_config(config)?;
    match control.run(cycles).await? {
        ExitReason::RebootRequested => info!("Exiting for host reboot"),
        ExitReason::CycleLimit => info!("Stopped after {} cycles", control.get_cycle_count()),
    }
    Ok(())
}

fn handle_detect(config: &ControllerConfig) {
    for mut set in build_sensor_sets(&config.sensors) {
        println!("{}", set.family().bright_blue().bold());
        match set.detect() {
            Ok(count) => println!("  {} {} sensors detected", "✅".green(), count),
            Err(e) => {
                println!("  {} {}", "❌".red(), e.to_string().bright_red());
                continue;
            }
        }
        match set.read_all() {
            Ok(readings) => {
                for reading in readings {
                    let value = match reading.temperature_celsius {
                        Some(t) if reading.valid => format!("{:.3}°C", t).green(),
                        Some(t) => format!("{:.3}°C (rejected)", t).yellow(),
                        None => "no reading".red(),
                    };
                    println!("  {:<20} {}", reading.sensor_id.to_string(), value);
                }
            }
            Err(e) => println!("  {} {}", "❌".red(), e.to_string().bright_red()),
        }
    }
}

fn handle_status(config: &ControllerConfig, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = config.paths.status_file.as_ref() else {
        println!("{}", "No status_file configured for this tent.".yellow());
        return Ok(());
    };
    let snapshot = StatusSnapshot::read(path)?;

    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let record = &snapshot.record;
    println!("{} {}", "Tent".bright_blue().bold(), snapshot.tent_id.bright_blue().bold());
    println!("{} {}", "Last cycle:".bright_white(), record.timestamp);
    println!("{} {}", "Sensors detected:".bright_white(), snapshot.sensors_detected);
    println!("{} {}", "Indoor:".bright_white(), format_temperature(snapshot.indoor_avg));
    println!("{} {}", "Outdoor:".bright_white(), format_temperature(snapshot.outdoor));
    let heater = match record.heater_state {
        HeaterState::Off => record.heater_state.label().white(),
        HeaterState::On | HeaterState::Stage2 => record.heater_state.label().bright_red(),
        HeaterState::SensorFault => record.heater_state.label().yellow(),
    };
    println!("{} {}", "Heater:".bright_white(), heater);
    if let Some(ppm) = record.co2_ppm {
        println!("{} {} ppm", "CO2:".bright_white(), ppm);
    }

    let level = match snapshot.fault_level {
        FaultLevel::Normal => "NORMAL".green(),
        FaultLevel::Degraded => "DEGRADED".yellow(),
        FaultLevel::Exhausted => "EXHAUSTED".red(),
    };
    println!(
        "{} {} ({} I/O errors, {} reboots)",
        "Faults:".bright_white(),
        level,
        snapshot.counters.io_errors,
        snapshot.counters.reboots
    );
    for entry in snapshot.history.iter().rev().take(5) {
        println!("  {} {:?}", entry.timestamp.to_string().dimmed(), entry.escalation);
    }
    Ok(())
}

fn handle_check_config(config: &ControllerConfig, path: &str) {
    println!("{} {} is valid", "✅".green(), path.bright_white());
    println!("  tent {}, check every {}s, summary every {}s", config.tent_id, config.check_interval_secs, config.log_interval_secs);
    println!("  heat when indoor - outdoor <= {}", config.temperature_diff);
    println!("  relays {:?}", config.relays.layout.pins());
    println!("  {} sensor families, CO2 {}", config.sensors.len(), if config.co2.is_some() { "on" } else { "off" });
}

fn format_temperature(value: Option<f64>) -> ColoredString {
    match value {
        Some(t) => format!("{:.2}°C", t).normal(),
        None => "undefined".yellow(),
    }
}
