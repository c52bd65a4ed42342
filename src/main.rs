use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ideal_led_lib::command::ResetVariant;
use ideal_led_lib::{
    Command, DeviceSession, Diagnosis, DiagnosticConfig, NoFeedback, OperatorFacts, OperatorFeedback, Rgb,
    ScriptedFeedback, diagnose,
};

mod ble;
mod prompt;

use ble::BleChannel;
use prompt::InteractiveFeedback;

/// Control and diagnose iDeal LED BLE strip controllers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Controller address (MAC, or peripheral id on macOS)
    #[arg(short, long, env = "IDEAL_LED_ADDRESS", global = true)]
    address: Option<String>,
    /// JSON file with diagnostic and session options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Turn the strip on
    On,
    /// Turn the strip off
    Off,
    /// Set the configured LED count
    Count { count: u16 },
    /// Set a static color
    Color { r: u8, g: u8, b: u8 },
    /// List nearby BLE devices
    Discover {
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Probe the controller and classify why LEDs stay dark
    Diagnose {
        /// Ask at the terminal what the strip shows
        #[arg(short, long)]
        interactive: bool,
        /// Recorded operator answers (JSON) instead of prompting
        #[arg(long, conflicts_with = "interactive")]
        feedback: Option<PathBuf>,
        /// Comparison and inspection results (JSON)
        #[arg(long)]
        facts: Option<PathBuf>,
        /// Print the diagnosis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send factory-reset commands, then restore the full LED count
    Reset {
        /// One variant (e.g. factory_reset); all of them when omitted
        variant: Option<String>,
        /// LED count to send after resetting
        #[arg(long, default_value_t = 200)]
        count: u16,
    },
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> Result<DiagnosticConfig> {
    match path {
        Some(path) => DiagnosticConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(DiagnosticConfig::default()),
    }
}

fn parse_reset_variant(name: &str) -> Result<ResetVariant> {
    let wanted: String = name.chars().filter(|c| *c != '_' && *c != '-').collect();
    ResetVariant::ALL
        .into_iter()
        .find(|v| v.to_string().eq_ignore_ascii_case(&wanted))
        .with_context(|| format!("Unknown reset variant '{name}'"))
}

async fn open_session(address: Option<&str>, config: &DiagnosticConfig) -> Result<DeviceSession> {
    let Some(address) = address else {
        bail!("No controller address given (use --address or IDEAL_LED_ADDRESS)");
    };
    let adapter = ble::default_adapter().await?;
    let session = DeviceSession::new(Box::new(BleChannel::new(adapter)), address, config.session.clone());
    session.connect().await?;
    Ok(session)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;

    let commands: Vec<Command> = match cli.command {
        Action::Discover { seconds } => return discover(seconds).await,
        Action::Diagnose {
            interactive,
            feedback,
            facts,
            json,
        } => {
            let mut feedback: Box<dyn OperatorFeedback> = match (interactive, feedback) {
                (true, _) => Box::new(InteractiveFeedback::new()),
                (false, Some(path)) => Box::new(ScriptedFeedback::from_json_file(&path)?),
                (false, None) => Box::new(NoFeedback),
            };
            let facts = match facts {
                Some(path) => OperatorFacts::from_json_file(&path)?,
                None => OperatorFacts::default(),
            };
            return run_diagnose(cli.address.as_deref(), config, feedback.as_mut(), &facts, json).await;
        }
        Action::On => vec![Command::power(true)],
        Action::Off => vec![Command::power(false)],
        Action::Count { count } => vec![Command::led_count(i64::from(count))],
        Action::Color { r, g, b } => vec![Command::color(Rgb::new(r.into(), g.into(), b.into()))],
        Action::Reset { variant, count } => {
            let variants = match variant {
                Some(name) => vec![parse_reset_variant(&name)?],
                None => ResetVariant::ALL.to_vec(),
            };
            variants
                .into_iter()
                .map(Command::FactoryReset)
                .chain([Command::led_count(i64::from(count)), Command::power(true)])
                .collect()
        }
    };

    let session = open_session(cli.address.as_deref(), &config).await?;
    let mut failed = 0;
    for command in &commands {
        match session.send_command(command).await {
            Ok(result) => info!("{command}: acked={}", result.acked),
            Err(e) => {
                warn!("{command}: {e}");
                failed += 1;
            }
        }
    }
    session.disconnect().await;

    if failed == commands.len() {
        bail!("No command reached the controller");
    }
    Ok(())
}

async fn discover(seconds: u64) -> Result<()> {
    let adapter = ble::default_adapter().await?;
    info!("Scanning for {seconds}s...");
    let devices = ble::discover(&adapter, Duration::from_secs(seconds)).await?;
    if devices.is_empty() {
        info!("No BLE devices found.");
    }
    for device in devices {
        println!(
            "{} {:<24} rssi {:>4}{}",
            device.address,
            device.name.as_deref().unwrap_or("<unnamed>"),
            device.rssi.map_or_else(|| "?".to_string(), |r| r.to_string()),
            if device.is_controller { "  <- LED controller" } else { "" }
        );
    }
    Ok(())
}

async fn run_diagnose(
    address: Option<&str>,
    config: DiagnosticConfig,
    feedback: &mut dyn OperatorFeedback,
    facts: &OperatorFacts,
    json: bool,
) -> Result<()> {
    let session = open_session(address, &config).await?;

    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current command...");
            token.cancel();
        }
    });

    let result = diagnose(&session, config, feedback, facts).await;
    session.disconnect().await;
    let diagnosis = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnosis)?);
    } else {
        print_report(&diagnosis);
    }
    Ok(())
}

fn print_report(diagnosis: &Diagnosis) {
    println!("Diagnosis: {diagnosis}");
    println!();
    println!("Evidence:");
    for observation in &diagnosis.evidence {
        let failures = match observation.command_failures {
            0 => String::new(),
            n => format!(" ({n} failed command(s))"),
        };
        println!("  {}{failures}", observation.probe_id);
        for note in &observation.notes {
            println!("    - {note}");
        }
    }
    println!();
    println!("Recommended actions:");
    for (i, action) in diagnosis.recommended_actions.iter().enumerate() {
        println!("  {}. {action}", i + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_reset_variant_names() {
        assert_eq!(parse_reset_variant("factory_reset").unwrap(), ResetVariant::FactoryReset);
        assert_eq!(parse_reset_variant("reset-200-led").unwrap(), ResetVariant::Reset200Led);
        assert_eq!(parse_reset_variant("Reset").unwrap(), ResetVariant::Reset);
        assert!(parse_reset_variant("reboot").is_err());
    }

    #[test]
    fn test_parse_diagnose_flags() {
        let cli = Cli::try_parse_from(["ideal-led", "-a", "AA:BB", "diagnose", "--interactive", "--json"]).unwrap();
        assert_eq!(cli.address.as_deref(), Some("AA:BB"));
        assert!(matches!(
            cli.command,
            Action::Diagnose {
                interactive: true,
                json: true,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["ideal-led", "diagnose", "--interactive", "--feedback", "f.json"]).is_err());
    }
}
