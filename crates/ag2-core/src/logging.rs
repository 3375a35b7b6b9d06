//! Structured logging bootstrap plus a small typed-event layer over raw
//! `tracing` macros (Design Notes' "duck-typed logger": one concrete
//! backend, so narrow free functions instead of a trait object).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes stdout logging plus a rolling file writer under `./log/`
/// (spec §6: "Logs appended to `./log/<timestamp>.log`"). Returns the
/// guard that must be kept alive for the file writer to flush.
pub fn init(debug: bool) -> WorkerGuard {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_appender = rolling::never("log", timestamped_log_name());
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stdout.and(non_blocking))
        .init();

    guard
}

fn timestamped_log_name() -> String {
    let now = time::OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}.log",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn log_upstream(method: &str, model: &str, account: &str, status: u16) {
    tracing::info!(method, model, account, status, "upstream call");
}

pub fn log_retry(model: &str, account: &str, attempt: u32, delay_ms: u64) {
    tracing::warn!(model, account, attempt, delay_ms, "retrying upstream call");
}

pub fn log_quota(model: &str, account: &str, remaining_percent: Option<u8>) {
    tracing::info!(model, account, ?remaining_percent, "quota snapshot updated");
}

pub fn log_stream(model: &str, account: &str, event: &str) {
    tracing::debug!(model, account, event, "stream event");
}

pub fn log_account(account: &str, event: &str) {
    tracing::info!(account, event, "account lifecycle event");
}
