use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

/// Current time in the local offset, falling back to UTC when the offset
/// cannot be determined (e.g. multi-threaded test runners).
pub fn now_local() -> time::OffsetDateTime {
    time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc())
}

/// Initialize logging. Keep the returned guard alive for the lifetime of the
/// process, dropping it flushes the non-blocking writer.
pub fn init_log(log: Option<PathBuf>) -> tracing_appender::non_blocking::WorkerGuard {
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = if let Some(log) = log {
        // output to file, daily rotate, non-blocking
        if !log.is_dir() {
            panic!("log path is not a directory");
        }
        let file_appender = tracing_appender::rolling::daily(log, "course_engine.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        // output to stdout
        tracing_appender::non_blocking(std::io::stdout())
    };
    let _ = tracing::subscriber::set_global_default(
        subscriber_builder.with_writer(non_blocking).finish(),
    );
    guard
}
