//! gpu-mmio-hwmon daemon (gpu-mmio-hwmond)
//!
//! Binds the GPU once at startup, hosts its sensor chip for the life of the
//! process and serves it over a unix socket. A missing or unsupported GPU is
//! a startup failure; there is no retry.
//!
//! # Security Model
//! - **Privilege**: runs as root to map the register window
//! - **Socket**: world-accessible, writes need peer uid 0
//! - **Limits**: connection, message size and timeout limits in `server`
//! - **Isolation**: restrictive umask, no core dumps, working directory `/`

mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use gpu_mmio_hwmon::config::{self, DaemonConfig};
use gpu_mmio_hwmon::constants::paths;
use gpu_mmio_hwmon::{logger, HwmonService, SysfsPciBus};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Hardening
// ============================================================================

fn set_secure_umask() {
    // SAFETY: umask only changes the process file creation mask.
    unsafe { libc::umask(0o077) };
}

fn disable_core_dumps() {
    let limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: RLIMIT_CORE is a valid resource and `limit` is initialized.
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        warn!("Failed to disable core dumps");
    }
}

fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

fn verify_privileges() -> Result<(), &'static str> {
    // SAFETY: geteuid has no preconditions.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err("gpu-mmio-hwmond must run as root to map GPU registers");
    }
    Ok(())
}

// ============================================================================
// Logging
// ============================================================================

fn init_tracing(filter: &str) -> bool {
    use tracing_subscriber::prelude::*;

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(journald)
                    .with(tracing_subscriber::EnvFilter::new(filter))
                    .init();
                return true;
            }
            Err(e) => eprintln!("Failed to create journald layer: {}, falling back to stderr", e),
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(filter)
        .init();
    false
}

// ============================================================================
// CLI
// ============================================================================

struct Args {
    socket: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn print_help() {
    eprintln!("gpu-mmio-hwmond {} - GPU register and telemetry sensor daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    gpu-mmio-hwmond [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -s, --socket PATH   Socket path (default {})", paths::SOCKET);
    eprintln!("    -c, --config PATH   Config file (default {}/{})", paths::CONFIG_DIR, paths::CONFIG_FILE);
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}   Log filter, overrides log_level from the config", paths::LOG_ENV);
    eprintln!("    {}  Config file path", paths::CONFIG_ENV);
}

/// `Ok(None)` means the process should exit successfully (help/version)
fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = Args { socket: None, config: None };
    let mut it = std::env::args().skip(1);

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("gpu-mmio-hwmond {}", VERSION);
                return Ok(None);
            }
            "-s" | "--socket" => {
                let p = it.next().context("--socket requires a path argument")?;
                args.socket = Some(PathBuf::from(p));
            }
            "-c" | "--config" => {
                let p = it.next().context("--config requires a path argument")?;
                args.config = Some(PathBuf::from(p));
            }
            other => {
                print_help();
                anyhow::bail!("unknown argument: {}", other);
            }
        }
    }
    Ok(Some(args))
}

fn load_config(args: &Args) -> anyhow::Result<DaemonConfig> {
    let path = args.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = config::load_config_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(socket) = &args.socket {
        cfg.socket_path = socket.clone();
        config::validate_config(&cfg)?;
    }
    Ok(cfg)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };
    let cfg = load_config(&args)?;

    let filter = std::env::var(paths::LOG_ENV).unwrap_or_else(|_| cfg.log_level.clone());
    let journald = init_tracing(&filter);

    set_secure_umask();
    disable_core_dumps();
    secure_working_directory();

    info!("gpu-mmio-hwmond {} starting", VERSION);
    info!("Logging to {}", if journald { "systemd journal" } else { "stderr" });
    debug!("Config: {:?}", cfg);

    if let Err(e) = verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    if let Some(path) = &cfg.event_log {
        if let Err(e) = logger::init_event_log(path) {
            warn!("Event log {} unavailable: {}", path.display(), e);
        }
    }
    logger::log_event("startup", serde_json::json!({ "version": VERSION }));

    let service = Arc::new(HwmonService::new());
    let bus = SysfsPciBus::new(&cfg.pci_root);
    if let Err(e) = service.start(&bus) {
        error!("Failed to bind GPU: {}", e);
        logger::close_event_log();
        std::process::exit(1);
    }

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || shutdown.notify_one()) {
            warn!("Failed to set signal handler: {}", e);
        }
    }

    let result = server::run_server(&cfg.socket_path, Arc::clone(&service), shutdown).await;

    service.stop();
    logger::log_event("shutdown", serde_json::json!({}));
    logger::close_event_log();

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }
    info!("Shutdown complete");
    Ok(())
}
