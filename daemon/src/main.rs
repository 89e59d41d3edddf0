mod backend;
mod buffer;
mod config;
mod diagnostics;
mod display;
mod host;
mod imaging;
mod ipc_server;
mod launcher;
mod macros;
mod playback;
mod profiles;
mod reaper;
mod surface;
mod text;
mod video;
mod wayland;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::display::{DisplayCommand, DisplayLoop};
use crate::host::{ContentSurfaceHost, HostSettings};
use crate::ipc_server::IpcContext;
use crate::playback::PlaybackOrchestrator;
use crate::profiles::ProfileStore;
use crate::wayland::Compositor;

#[tokio::main]
async fn main() -> Result<()> {
    // Config is read before logging starts so its level can apply
    let loaded = config::Config::load();
    let level = match &loaded {
        Ok(cfg) => cfg.general.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("Starting Marquee display daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = config::Config::default_config_path()?;
    log::info!("Looking for config at: {}", config_path.display());

    let config = match loaded {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded successfully");
            log::info!("  General settings:");
            log::info!("    - Log level: {}", cfg.general.log_level);
            log::info!("    - Default scale: {}", cfg.general.default_scale);
            match &cfg.general.startup_profile {
                Some(name) => log::info!("    - Startup profile: {}", name),
                None => log::info!("    - Startup profile: none"),
            }
            log::info!("  Playback settings:");
            log::info!("    - Decoder: {}", cfg.playback.decoder);
            log::info!("    - Backends: {}", cfg.playback.backends.join(", "));
            log::info!("    - Startup timeout: {}ms", cfg.playback.startup_timeout_ms);
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {:#}. Using defaults.", e);
            config::Config::default()
        }
    };

    let (events_tx, _) = broadcast::channel(64);

    let profiles_path = ProfileStore::default_path()?;
    let profiles = ProfileStore::open(&profiles_path).unwrap_or_else(|e| {
        log::warn!("Failed to load profiles: {:#}. Starting with none.", e);
        ProfileStore::empty(&profiles_path)
    });

    // Display loop on its own blocking thread, which also owns the
    // compositor connection
    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let display_events = events_tx.clone();
    let display_handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let compositor = match Compositor::connect() {
            Ok(compositor) => Some(compositor),
            Err(e) => {
                log::warn!("No Wayland compositor: {:#}. Running headless.", e);
                None
            }
        };

        let screens = match compositor.as_ref().map(Compositor::screens) {
            Some(screens) if !screens.is_empty() => screens,
            _ => {
                log::info!("Using screens from config");
                config.screen_infos()
            }
        };
        for screen in &screens {
            log::info!(
                "  Screen {}: {}x{} at {},{}{}",
                screen.name,
                screen.width,
                screen.height,
                screen.x,
                screen.y,
                if screen.primary { " (primary)" } else { "" }
            );
        }

        let detected = backend::detect(&config, compositor.is_some());
        let orchestrator = PlaybackOrchestrator::new(detected.ranked, detected.factory);
        let settings = HostSettings {
            ffprobe: config
                .diagnostics
                .probe
                .then(|| config.playback.ffprobe.clone()),
            repair_tool: config.diagnostics.repair_tool.clone(),
            default_scale: config.default_scale(),
            start_fullscreen: config.window.start_fullscreen,
        };

        let host = ContentSurfaceHost::new(
            screens,
            config.window.chrome()?,
            orchestrator,
            settings,
            display_events,
        )?;

        let mut display = DisplayLoop::new(host, profiles, compositor);
        display.apply_startup_profile(config.general.startup_profile.as_deref());
        display.run(display_rx);
        Ok(())
    });

    let state = Arc::new(Mutex::new(DaemonState::new()));

    // Start IPC server
    let ipc_ctx = IpcContext {
        state: state.clone(),
        display_tx: display_tx.clone(),
        events: events_tx,
    };
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_ctx).await {
            log::error!("IPC server error: {:#}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    let signal_tx = display_tx;
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                log::error!("Failed to set up signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
        let _ = signal_tx.send(DisplayCommand::Shutdown);
    });

    // The display loop ends on Kill or a signal, after draining the reaper
    let display_result = display_handle.await.context("Display loop panicked")?;
    state.lock().await.should_exit = true;
    if let Err(e) = &display_result {
        log::error!("Display loop failed to start: {:#}", e);
    }

    if ipc_handle.await.is_err() {
        log::error!("IPC server task panicked");
    }

    log::info!("Daemon shut down");
    display_result
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
}

impl DaemonState {
    fn new() -> Self {
        Self { should_exit: false }
    }
}
