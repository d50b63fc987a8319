use clap::ValueEnum;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("a global logger is already installed")]
    AlreadyInitialized,

    #[error("logger initialization failed: {0}")]
    InitializationFailed(String),
}

/// Install the global subscriber. `level` takes `EnvFilter` directives.
pub fn init(format: LogFormat, level: &str) -> Result<(), LoggerError> {
    let filter = mk_filter(level)?;
    match format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true));
            init_with(subscriber)
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_ansi(false).with_target(true));
            init_with(subscriber)
        }
    }
}

fn mk_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn init_with<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let already_set = std::error::Error::source(&e)
            .is_some_and(|src| src.is::<tracing::subscriber::SetGlobalDefaultError>());
        if already_set {
            LoggerError::AlreadyInitialized
        } else {
            LoggerError::InitializationFailed(e.to_string())
        }
    })
}
