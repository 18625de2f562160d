use alarm_server::{advertised_ip, AlarmServer, EventSink, ListenerConfig, ServerOptions};
use anyhow::{Context, Result};
use clap::Parser;
use isapi_client::{DeviceConfig, IsapiClient, PushTarget};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod alarm_log;
pub mod logging;
pub mod reaction;
pub mod snapshots;

use alarm_log::AlarmLogger;
use logging::LoggingMode;
use reaction::{ReactionConfig, ReactionPipeline};
use snapshots::{SnapshotStore, DEFAULT_MAX_IMAGES};

/// Hikvision acoustic imaging alarm monitor
///
/// Receives alarm pushes from the camera, logs them, keeps the latest
/// snapshots and can re-arm acoustic detection after every alarm.
#[derive(Parser, Debug)]
#[command(name = "acoustic-monitor")]
#[command(version)]
pub struct Args {
    /// Address to listen on, e.g. 0.0.0.0:8080 or http://+:8080/
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Largest accepted alarm body in MiB
    #[arg(long, default_value = "32")]
    pub max_body_mb: usize,

    /// Camera address (host, host:port or http:// URL)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Camera user name
    #[arg(short, long, default_value = "admin")]
    pub username: String,

    /// Camera password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Audio input addressed by the acoustic endpoints
    #[arg(long, default_value = "1")]
    pub audio_in: u32,

    /// Configure the camera to push alarms to this listener
    #[arg(long)]
    pub register: bool,

    /// Address the camera should push to (default: detected local address)
    #[arg(long)]
    pub advertise: Option<String>,

    /// Push target slot on the camera
    #[arg(long, default_value = "1")]
    pub host_id: u32,

    /// Re-arm acoustic detection after every alarm
    #[arg(long)]
    pub react: bool,

    /// Filter times in seconds, applied in turn on each reaction
    #[arg(long, value_delimiter = ',', default_value = "60,120")]
    pub filter_times: Vec<u32>,

    /// Analysis time in seconds written with every reaction
    #[arg(long, default_value = "10")]
    pub analysis_time: u32,

    /// Directory alarm images are written to
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Number of recent alarm images kept in memory
    #[arg(long, default_value = "10")]
    pub max_images: usize,

    /// Log every decoded alarm as JSON
    #[arg(long)]
    pub show_raw_data: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format (development, debug, json)
    #[arg(long, default_value = "development")]
    pub log_mode: String,
}

impl Args {
    /// Apply `HK_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(listen) = lookup("HK_LISTEN") {
            self.listen = listen;
        }
        if let Some(device) = lookup("HK_DEVICE") {
            self.device = Some(device);
        }
        if let Some(username) = lookup("HK_USERNAME") {
            self.username = username;
        }
        if let Some(password) = lookup("HK_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(audio_in) = lookup("HK_AUDIO_IN") {
            self.audio_in = audio_in
                .parse()
                .context("Invalid HK_AUDIO_IN environment variable")?;
        }
        if let Some(advertise) = lookup("HK_ADVERTISE") {
            self.advertise = Some(advertise);
        }
        if let Some(filter_times) = lookup("HK_FILTER_TIMES") {
            self.filter_times = filter_times
                .split(',')
                .map(|value| value.trim().parse::<u32>())
                .collect::<Result<_, _>>()
                .context("Invalid HK_FILTER_TIMES environment variable")?;
        }
        if let Some(analysis_time) = lookup("HK_ANALYSIS_TIME") {
            self.analysis_time = analysis_time
                .parse()
                .context("Invalid HK_ANALYSIS_TIME environment variable")?;
        }
        if let Some(snapshot_dir) = lookup("HK_SNAPSHOT_DIR") {
            self.snapshot_dir = Some(PathBuf::from(snapshot_dir));
        }
        if let Some(log_level) = lookup("HK_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(log_mode) = lookup("HK_LOG_MODE") {
            self.log_mode = log_mode;
        }
        if lookup("HK_REGISTER").is_some() {
            self.register = true;
        }
        if lookup("HK_REACT").is_some() {
            self.react = true;
        }
        if lookup("HK_SHOW_RAW_DATA").is_some() {
            self.show_raw_data = true;
        }
        Ok(())
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        ListenerConfig::parse(&self.listen)?;

        if self.max_body_mb == 0 {
            return Err(anyhow::anyhow!("Maximum body size must be positive"));
        }

        if (self.register || self.react) && self.device.is_none() {
            return Err(anyhow::anyhow!("--register and --react need --device"));
        }

        if self.device.is_some() && self.password.is_none() {
            return Err(anyhow::anyhow!("A camera password is required (--password or HK_PASSWORD)"));
        }

        if self.filter_times.is_empty() || self.filter_times.contains(&0) {
            return Err(anyhow::anyhow!("Filter times must be positive"));
        }

        if self.analysis_time == 0 {
            return Err(anyhow::anyhow!("Analysis time must be positive"));
        }

        if self.max_images == 0 {
            return Err(anyhow::anyhow!("At least one image must be kept"));
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                ));
            }
        }
        self.log_mode.parse::<LoggingMode>()?;

        Ok(())
    }
}

/// Camera connection and what to do with it
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub config: DeviceConfig,
    pub register: Option<PushRegistration>,
    pub reaction: Option<ReactionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRegistration {
    /// None means detect at startup
    pub advertise: Option<String>,
    pub host_id: u32,
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenerConfig,
    pub max_body_bytes: usize,
    pub device: Option<DeviceSettings>,
    pub snapshot_dir: Option<PathBuf>,
    pub max_images: usize,
    pub show_raw_data: bool,
    pub log_level: String,
    pub log_mode: LoggingMode,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        args.validate()?;

        let device = match (args.device, args.password) {
            (Some(address), Some(password)) => Some(DeviceSettings {
                config: DeviceConfig::new(address, args.username, password).with_audio_in(args.audio_in),
                register: args.register.then(|| PushRegistration {
                    advertise: args.advertise,
                    host_id: args.host_id,
                }),
                reaction: args.react.then(|| ReactionConfig {
                    filter_times: args.filter_times,
                    analysis_time: args.analysis_time,
                }),
            }),
            _ => None,
        };

        Ok(Self {
            listen: ListenerConfig::parse(&args.listen)?,
            max_body_bytes: args.max_body_mb * 1024 * 1024,
            device,
            snapshot_dir: args.snapshot_dir,
            max_images: args.max_images,
            show_raw_data: args.show_raw_data,
            log_level: args.log_level,
            log_mode: args.log_mode.parse()?,
        })
    }
}

impl Config {
    /// Create configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        let mut args = Args::parse();
        args.apply_env_overrides(|key| std::env::var(key).ok())?;
        Config::try_from(args)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  Listen: {}", self.listen);
        info!("  Max body: {} bytes", self.max_body_bytes);
        match &self.device {
            Some(device) => {
                info!("  Device: {} (audio input {})", device.config.address, device.config.audio_in_id);
                info!("  Register push target: {}", device.register.is_some());
                match &device.reaction {
                    Some(reaction) => info!(
                        "  Reaction: filter times {:?}, analysis time {}s",
                        reaction.filter_times, reaction.analysis_time
                    ),
                    None => info!("  Reaction: disabled"),
                }
            }
            None => info!("  Device: none (listen only)"),
        }
        info!("  Images kept: {}", self.max_images);
        if let Some(dir) = &self.snapshot_dir {
            info!("  Snapshot directory: {}", dir.display());
        }
        info!("  Log level: {} ({:?})", self.log_level, self.log_mode);
    }
}

async fn run(config: Config) -> Result<()> {
    let sink = EventSink::new();

    let logger = Arc::new(AlarmLogger::new(config.show_raw_data));
    sink.register(logger.clone()).await;

    let snapshots = Arc::new(SnapshotStore::new(config.max_images, config.snapshot_dir.clone()));
    sink.register(snapshots.clone()).await;

    let server = AlarmServer::new(
        sink.clone(),
        ServerOptions::new().with_max_body_bytes(config.max_body_bytes),
    );
    let local_addr = server
        .start(config.listen.clone())
        .await
        .context("Failed to start alarm listener")?;
    info!("Listening for alarms on {local_addr}");

    let mut reaction_worker = None;
    if let Some(device) = &config.device {
        let client = Arc::new(IsapiClient::new(device.config.clone()).context("Failed to create device client")?);

        if let Some(registration) = &device.register {
            register(&client, registration, local_addr.port()).await;
        }

        if let Some(reaction) = &device.reaction {
            let (pipeline, handle) = ReactionPipeline::spawn(client.clone(), reaction.clone());
            let observer = sink.register(Arc::new(pipeline)).await;
            reaction_worker = Some((observer, handle));
            info!("Reaction pipeline enabled");
        }
    }

    println!("\nListening for alarms... (Press Ctrl+C to stop)\n");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down");

    server.stop().await;

    if let Some((observer, handle)) = reaction_worker {
        // Dropping the observer closes the trigger channel and ends the worker
        sink.unregister(observer).await;
        if let Err(e) = handle.await {
            warn!("Reaction worker ended abnormally: {e}");
        }
    }

    let stats = server.stats();
    info!(
        "Requests: {} total, {} events, {} ignored, {} undecodable, {} oversized, {} rejected",
        stats.requests,
        stats.events,
        stats.ignored,
        stats.decode_failures,
        stats.oversized,
        stats.rejected_methods
    );
    info!("{}", logger.stats().summary());
    info!("{} image(s) kept", snapshots.len().await);

    Ok(())
}

/// Point the camera at this listener. Failures are logged; the listener keeps
/// running so a manually configured camera still works.
async fn register(client: &IsapiClient, registration: &PushRegistration, port: u16) {
    let address = match registration.advertise.clone() {
        Some(address) => address,
        None => match advertised_ip() {
            Some(ip) => ip.to_string(),
            None => {
                error!("Could not detect a local address to advertise; use --advertise");
                return;
            }
        },
    };

    let target = PushTarget::new(address, port).with_id(registration.host_id);
    match client.register_push_target(target).await {
        Ok(result) => {
            if result.changed {
                info!("Camera now pushes alarms to {}", result.target.url());
            } else {
                info!("Camera already pushes alarms to {}", result.target.url());
            }
            if !result.tested {
                warn!("Camera could not reach {}; check firewall settings", result.target.url());
            }
        }
        Err(e) => error!("Push target registration failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to parse configuration")?;

    logging::init_logging(config.log_mode, &config.log_level).context("Failed to initialize logging")?;

    config.print_summary();

    if let Err(e) = run(config).await {
        error!("Alarm monitor failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
