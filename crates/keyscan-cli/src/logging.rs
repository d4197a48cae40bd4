use std::path::Path;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: once_cell::sync::Lazy<std::sync::Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(None));

/// 日志同时写到 stderr 和按天滚动的文件
///
/// stdout 只留给命令结果，日志一律走 stderr。
pub fn init(verbose: bool, log_dir: &Path) {
    let default_level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    for directive in ["reqwest=warn", "hyper=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let file_layer = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "keyscan.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            if let Ok(mut slot) = LOG_GUARD.lock() {
                *slot = Some(guard);
            }
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
        }
        Err(e) => {
            eprintln!("无法创建日志目录 {}: {}", log_dir.display(), e);
            None
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(verbose)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init();

    tracing::debug!("日志目录: {}", log_dir.display());
}
