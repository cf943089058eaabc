//! CLI Entry Point for id_control
//!
//! Provides command-line interface for:
//! - Running a polarisation move against a simulated insertion device
//! - Checking a configuration file
//!
//! # Usage
//!
//! Move a simulated device to circular right at 60 mm gap:
//! ```bash
//! id_control simulate --mode CR --gap 60 --phase 10
//! ```
//!
//! Drive the same move through simulated channels and the registry:
//! ```bash
//! id_control simulate --backend channels --mode LV --gap 40
//! ```
//!
//! Validate a configuration:
//! ```bash
//! id_control check-config --config config/id_control.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use id_control::config::{Settings, DEFAULT_CONFIG_PATH};
use id_control::device::{
    AxisPosition, ChannelBackedId, InsertionDevice, MotionSequencer, MoveEvent, PolarisationMode,
    SimulatedId,
};
use id_control::registry::ChannelRegistry;
use id_control::tracing_setup;
use id_control::transport::ConnectPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "id_control")]
#[command(about = "Apple II insertion device polarisation control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// In-memory device
    Memory,
    /// Simulated process variables behind a channel registry
    Channels,
}

#[derive(Subcommand)]
enum Commands {
    /// Move a simulated device to a polarisation mode
    Simulate {
        /// Target mode (LH, LV, CR, CL, LAP, LAN)
        #[arg(long)]
        mode: PolarisationMode,

        /// Target gap in mm
        #[arg(long)]
        gap: f64,

        /// Phase-motor offset in mm; required for CR, CL, LAP and LAN
        #[arg(long)]
        phase: Option<f64>,

        #[arg(long, value_enum, default_value = "memory")]
        backend: Backend,
    },

    /// Load and validate the configuration
    CheckConfig {
        /// Print the effective configuration as JSON
        #[arg(long)]
        dump: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Err(e) = settings.validate() {
        bail!("invalid configuration: {e}");
    }
    tracing_setup::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Simulate {
            mode,
            gap,
            phase,
            backend,
        } => simulate(&settings, mode, gap, phase, backend).await,
        Commands::CheckConfig { dump } => check_config(&settings, &cli.config, dump),
    }
}

async fn simulate(
    settings: &Settings,
    mode: PolarisationMode,
    gap: f64,
    phase: Option<f64>,
    backend: Backend,
) -> Result<()> {
    let phase = match (mode, phase) {
        (PolarisationMode::LH | PolarisationMode::LV, phase) => phase.unwrap_or(0.0),
        (_, Some(phase)) => phase,
        (_, None) => bail!("--phase is required for {mode}"),
    };
    println!("🧲 {} - simulated insertion device", settings.application.name);

    let start = AxisPosition::horizontal(settings.limits.min_gap.max(20.0));
    let (device, registry): (Arc<dyn InsertionDevice>, Option<ChannelRegistry>) = match backend {
        Backend::Memory => {
            let device = SimulatedId::builder()
                .position(start)
                .move_duration(settings.simulation.move_duration())
                .build();
            (Arc::new(device), None)
        }
        Backend::Channels => {
            println!("🔌 Connecting channels...");
            let transport = settings
                .channels
                .simulated_transport(start)
                .with_policy(ConnectPolicy::Auto(settings.simulation.connect_delay()))
                .with_put_callback_delay(settings.simulation.move_duration());
            let registry = ChannelRegistry::builder(Arc::new(transport))
                .mailbox_capacity(settings.registry.mailbox_capacity)
                .initial_values(settings.initial_values.clone())
                .spawn();
            registry
                .set_ready_listener(|| info!("insertion device channels ready"))
                .await?;
            let device = ChannelBackedId::create(&registry, &settings.channels).await?;
            registry.mark_creation_phase_completed().await?;
            if !registry.await_ready(settings.registry.ready_timeout()).await {
                let pending = registry.unconnected_critical().await?;
                bail!("channels did not connect: {}", pending.join(", "));
            }
            println!("✅ All critical channels connected");
            (Arc::new(device), Some(registry))
        }
    };

    let sequencer = MotionSequencer::spawn(device, settings.limits);
    sequencer.subscribe(|event| match event {
        MoveEvent::StepIssued {
            step,
            total,
            target,
            ..
        } => println!("➡️  Step {}/{}: {}", step + 1, total, target),
        MoveEvent::Completed { target, at, .. } => {
            println!("✅ Reached {} at {}", target, at.format("%H:%M:%S%.3f"))
        }
        MoveEvent::Failed { error, .. } => eprintln!("❌ Move failed: {}", error),
    });

    println!("📍 Current: {} ({})", sequencer.position().await?, sequencer.mode().await?);
    let accepted = sequencer.move_to_mode(mode, gap, phase).await?;
    info!(move_id = %accepted.move_id, steps = accepted.plan.len(), "move requested");
    if accepted.plan.is_empty() {
        println!("Already at the requested position");
    }

    let budget = settings.simulation.move_duration() * 4 + Duration::from_secs(5);
    if !sequencer.wait_until_idle(budget).await {
        bail!("move did not finish within {:?}", budget);
    }
    println!("📍 Final: {} ({})", sequencer.position().await?, sequencer.mode().await?);

    if let Some(registry) = registry {
        registry.destroy().await?;
    }
    Ok(())
}

fn check_config(settings: &Settings, path: &Path, dump: bool) -> Result<()> {
    println!("📄 {}", path.display());
    println!("   Application:   {}", settings.application.name);
    println!("   Log level:     {}", settings.application.log_level);
    println!("   Min gap:       {} mm", settings.limits.min_gap);
    println!(
        "   Phase travel:  ±{} mm",
        settings.limits.max_phase_motor_position
    );
    println!("   Channels:      {}", settings.channels.all().len());
    println!("   Initial values: {}", settings.initial_values.len());
    println!("✅ Configuration is valid");
    if dump {
        println!("{}", serde_json::to_string_pretty(settings)?);
    }
    Ok(())
}
