use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Crates whose events reach stderr.
const LOG_TARGETS: [&str; 4] = [
    "pubsock",
    "pubsock_transport",
    "pubsock_frame",
    "pubsock_endpoint",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Debug output spans all layers; the target says which one spoke.
    fn shows_targets(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

fn workspace_filter(level: LogLevel) -> Targets {
    Targets::new().with_targets(LOG_TARGETS.map(|target| (target, level.as_filter())))
}

/// Install the stderr subscriber. Accept-loop events carry the thread name so
/// they can be told apart from caller-side events.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(level.shows_targets())
        .with_thread_names(true);
    let filter = workspace_filter(level);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn filter_covers_every_layer_at_the_chosen_level() {
        let filter = workspace_filter(LogLevel::Debug);
        for target in [
            "pubsock::cmd::publish",
            "pubsock_transport::poll",
            "pubsock_frame::writer",
            "pubsock_endpoint::acceptor",
        ] {
            assert!(filter.would_enable(target, &Level::DEBUG), "{target}");
            assert!(!filter.would_enable(target, &Level::TRACE), "{target}");
        }
    }

    #[test]
    fn filter_drops_foreign_targets() {
        let filter = workspace_filter(LogLevel::Trace);
        assert!(!filter.would_enable("ctrlc", &Level::ERROR));
    }

    #[test]
    fn targets_shown_only_when_debugging() {
        assert!(!LogLevel::Info.shows_targets());
        assert!(LogLevel::Trace.shows_targets());
    }
}
