//! autotap - trigger rules and recording playback for Android devices over adb.
//!
//! # Commands
//!
//! - `autotap monitor --scheme farm.json` - run a scheme's trigger rules
//! - `autotap play --recording route.json` - replay a recording
//! - `autotap simplify --recording route.json` - re-compress swipe trajectories
//!
//! Global flags `--serial`, `--adb` and `--dry-run` choose the device; a YAML
//! file given with `--config` supplies the remaining engine settings.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use autotap_core::trajectory::simplify;
use autotap_core::{
    load_config, load_recording_file, load_scheme_file, save_recording_file, CancelToken,
    CommandGate, DeviceChannel, EngineConfig, EngineContext, FrameSource, Interpreter,
    MonitorEvent, MonotonicClock, PlaybackOptions, Player, RecordedKind, RecordingLibrary, Storage,
    TriggerEngine,
};
use autotap_platform::{AdbChannel, AdbScreencap, CcoeffMatcher, DryRunChannel};

#[derive(Parser)]
#[command(name = "autotap")]
#[command(about = "Trigger rules and recording playback for Android devices")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    device: DeviceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DeviceArgs {
    /// Engine settings (YAML). Defaults to the per-user config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Device serial passed to `adb -s`
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Path to the adb executable
    #[arg(long, global = true)]
    adb: Option<PathBuf>,

    /// Log device commands instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheme's trigger rules and print events
    Monitor {
        /// Scheme file (JSON)
        #[arg(long)]
        scheme: PathBuf,
        /// Directory searched for `play_recording` references
        #[arg(long)]
        recordings: Option<PathBuf>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Replay a recording
    Play {
        #[arg(long)]
        recording: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        /// Perturb positions and durations slightly
        #[arg(long)]
        random: bool,
    },

    /// Re-simplify swipe trajectories in a recording, in place
    Simplify {
        #[arg(long)]
        recording: PathBuf,
        /// Douglas-Peucker epsilon in pixels (derived from path length when omitted)
        #[arg(long)]
        epsilon: Option<f64>,
    },
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autotap=info,autotap_core=info,autotap_platform=info".into()),
        )
        .try_init();
}

/// File settings with command-line overrides applied.
fn resolve_config(args: &DeviceArgs) -> Result<EngineConfig> {
    let path = args.config.clone().unwrap_or_else(EngineConfig::default_path);
    let mut config =
        load_config(&path).with_context(|| format!("failed to load config {}", path.display()))?;
    if let Some(serial) = &args.serial {
        config.serial = Some(serial.clone());
    }
    if let Some(adb) = &args.adb {
        config.adb_path = adb.display().to_string();
    }
    Ok(config)
}

struct Device {
    channel: Arc<dyn DeviceChannel>,
    frames: Option<Arc<dyn FrameSource>>,
}

fn connect(args: &DeviceArgs, config: &EngineConfig) -> Device {
    if args.dry_run {
        info!("dry run: commands are logged, image conditions are false");
        return Device {
            channel: Arc::new(CommandGate::new(Arc::new(DryRunChannel::new()))),
            frames: None,
        };
    }
    let adb = AdbChannel::new(&config.adb_path, config.serial.clone());
    if !adb.check_ready() {
        tracing::warn!(serial = ?adb.serial(), "device did not answer, commands may fail");
    }
    Device {
        channel: Arc::new(CommandGate::new(Arc::new(adb.clone()))),
        frames: Some(Arc::new(AdbScreencap::new(adb))),
    }
}

fn monitor(
    args: &DeviceArgs,
    scheme: PathBuf,
    recordings: Option<PathBuf>,
    seconds: Option<u64>,
) -> Result<()> {
    let config = resolve_config(args)?;
    let scheme = load_scheme_file(&scheme)
        .with_context(|| format!("failed to load scheme {}", scheme.display()))?;
    let device = connect(args, &config);

    let recordings = recordings.unwrap_or_else(|| Storage::default().recordings_dir());
    let player = Arc::new(Player::new(device.channel.clone(), config.playback));
    let interpreter = Arc::new(Interpreter::new(
        device.channel.clone(),
        player,
        Arc::new(RecordingLibrary::new(recordings)),
    ));
    let ctx = EngineContext {
        interpreter,
        frames: device.frames,
        matcher: Arc::new(CcoeffMatcher::new()),
        clock: Arc::new(MonotonicClock::new()),
    };

    let mut engine = TriggerEngine::new(ctx, scheme);
    if let Some(interval) = config.check_interval {
        engine = engine.with_check_interval(interval);
    }
    engine.start()?;

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let events = engine.events();
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => {
                println!("{}", serde_json::to_string(&event)?);
                if matches!(event, MonitorEvent::Stopped) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    engine.stop();
    Ok(())
}

fn play(args: &DeviceArgs, recording: PathBuf, speed: f64, random: bool) -> Result<()> {
    let config = resolve_config(args)?;
    let actions = load_recording_file(&recording)
        .with_context(|| format!("failed to load recording {}", recording.display()))?;
    let device = connect(args, &config);

    let player = Player::new(device.channel, config.playback);
    let options = PlaybackOptions {
        speed,
        randomize: random,
    };
    let started = Instant::now();
    let finished = player.play(&actions, options, &CancelToken::new())?;
    info!(finished, elapsed = ?started.elapsed(), "playback done");
    Ok(())
}

fn simplify_recording(recording: PathBuf, epsilon: Option<f64>) -> Result<()> {
    if epsilon.is_some_and(|e| !(e > 0.0)) {
        bail!("epsilon must be positive");
    }
    let mut actions = load_recording_file(&recording)
        .with_context(|| format!("failed to load recording {}", recording.display()))?;

    let mut before = 0;
    let mut after = 0;
    for action in &mut actions {
        if !matches!(action.kind, RecordedKind::Swipe { .. }) {
            continue;
        }
        if let Some(points) = action.trajectory.as_mut() {
            before += points.len();
            *points = simplify(points, epsilon);
            after += points.len();
        }
    }

    save_recording_file(&recording, &actions)?;
    println!("{}: {} trajectory points -> {}", recording.display(), before, after);
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            scheme,
            recordings,
            seconds,
        } => monitor(&cli.device, scheme, recordings, seconds),
        Commands::Play {
            recording,
            speed,
            random,
        } => play(&cli.device, recording, speed, random),
        Commands::Simplify { recording, epsilon } => simplify_recording(recording, epsilon),
    }
}
