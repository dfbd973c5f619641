use crate::config::Config;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Crates whose records are dropped below TRACE: the DB pool, the provider
/// HTTP stack and its retry middleware.
const NOISY_TARGETS: &[&str] = &[
    "sqlx",
    "sea_orm",
    "sea_orm_migration",
    "hyper",
    "hyper_util",
    "h2",
    "reqwest",
    "reqwest_retry",
    "rustls",
    "mio",
    "want",
];

pub struct Logger {}

impl Logger {
    /// Install the global terminal logger at `config.log_level_filter`.
    ///
    /// Must be called once, before any other crate logs.
    pub fn init_logger(config: &Config) {
        let level = config.log_level_filter;

        TermLogger::init(
            level,
            Self::log_config(level),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .expect("Failed to start simplelog");
    }

    fn ignored_targets(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            NOISY_TARGETS
        }
    }

    fn log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for target in Self::ignored_targets(level) {
            builder.add_filter_ignore_str(target);
        }
        builder.build()
    }
}
