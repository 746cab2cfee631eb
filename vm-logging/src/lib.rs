use std::{env, path::Path, path::PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::writer::MakeWriterExt, prelude::*, registry, EnvFilter};

/// Where formatted events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    Off,
}

/// Logging settings, read once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub json: bool,
    pub file_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Console,
            json: false,
            file_path: PathBuf::from("/tmp/vm-api.log"),
        }
    }
}

impl LogSettings {
    /// Read `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT` and `LOG_FILE_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let output = match lookup("LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            Some("off") | Some("none") => LogOutput::Off,
            _ => LogOutput::Console,
        };

        Self {
            level: lookup("LOG_LEVEL").unwrap_or(defaults.level),
            output,
            json: lookup("LOG_FORMAT").as_deref() == Some("json"),
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins over `settings.level` when set. The returned guard must be
/// held for the life of the process when file output is enabled, otherwise
/// buffered lines are lost on exit.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level))
        .add_directive("tokio=warn".parse().expect("static directive"))
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("sqlx=warn".parse().expect("static directive"));

    let subscriber = registry().with(env_filter);

    let log_dir = settings
        .file_path
        .parent()
        .unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = settings
        .file_path
        .file_name()
        .unwrap_or("vm-api.log".as_ref());

    match settings.output {
        LogOutput::Off => {
            subscriber.init();
            None
        }
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            None
        }
        LogOutput::File => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(guard)
        }
        LogOutput::Both => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stdout.and(non_blocking));
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(guard)
        }
    }
}
