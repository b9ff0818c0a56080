use std::{
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::{Duration, SystemTime},
};
use tokio::net::TcpListener;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Logging knobs shared by every service binary.
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub service_name: String,
    pub log_dir: Option<PathBuf>,
    pub retention_days: u64,
    pub cleanup_interval_minutes: u64,
}

impl LogConfig {
    pub fn from_env(service_name: &str) -> Self {
        // File output is opt-in; a local utility should not assume /var/log.
        let log_dir = env::var("LOG_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Self {
            service_name: service_name.to_string(),
            log_dir,
            retention_days: env_or("LOG_RETENTION_DAYS", 14u64),
            cleanup_interval_minutes: env_or("LOG_CLEANUP_INTERVAL_MINUTES", 360u64),
        }
    }

    fn service_log_root(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(&self.service_name))
    }
}

/// Keeps the non-blocking file writer alive; drop it only at process exit.
pub struct TracingGuards {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_tracing(config: &LogConfig) -> TracingGuards {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(io::stdout);

    let file_output = config
        .service_log_root()
        .and_then(|root| open_log_file(&root, &config.service_name).map(|out| (root, out)));

    let Some((log_root, (writer, guard))) = file_output else {
        let subscriber = Registry::default().with(filter).with(stdout_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
        return TracingGuards { _file_guard: None };
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer));
    let _ = tracing::subscriber::set_global_default(subscriber);

    spawn_log_pruner(
        log_root,
        config.retention_days,
        config.cleanup_interval_minutes,
    );

    TracingGuards {
        _file_guard: Some(guard),
    }
}

fn open_log_file(
    root: &Path,
    service_name: &str,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(root).ok()?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(service_name)
        .filename_suffix("log")
        .build(root)
        .ok()?;
    Some(tracing_appender::non_blocking(appender))
}

pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Retention and sweep interval for log pruning; `None` when either knob is zero.
fn pruning_schedule(
    retention_days: u64,
    cleanup_interval_minutes: u64,
) -> Option<(Duration, Duration)> {
    if retention_days == 0 || cleanup_interval_minutes == 0 {
        return None;
    }
    // Oversized values saturate instead of overflowing.
    let retention = Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60));
    let interval = Duration::from_secs(cleanup_interval_minutes.saturating_mul(60));
    Some((retention, interval))
}

fn spawn_log_pruner(log_root: PathBuf, retention_days: u64, cleanup_interval_minutes: u64) {
    let Some((retention, interval)) = pruning_schedule(retention_days, cleanup_interval_minutes)
    else {
        return;
    };

    thread::spawn(move || loop {
        if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
            let removed = prune_logs(&log_root, cutoff);
            if removed > 0 {
                tracing::debug!(removed, root = %log_root.display(), "pruned old log files");
            }
        }
        thread::sleep(interval);
    });
}

/// Removes files under `root` last modified before `cutoff`. Returns how many were removed.
pub fn prune_logs(root: &Path, cutoff: SystemTime) -> usize {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            removed += prune_logs(&path, cutoff);
            continue;
        }
        let modified = match entry.metadata().and_then(|metadata| metadata.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if modified < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

pub async fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "sigterm handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
