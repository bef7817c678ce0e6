use log::LevelFilter;

use crate::settings::GlobalSettings;

/// Install the process-wide logger.
///
/// Hosts embedding the adapters call this once at startup. Each record is
/// prefixed with an RFC 3339 timestamp, the level and the emitting module.
///
/// # Errors
///
/// Returns [`log::SetLoggerError`] when a logger has already been installed.
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                record.target(),
                message
            ));
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

/// Install the logger at the level named by `[global] log_level`.
///
/// # Errors
///
/// Returns [`log::SetLoggerError`] when a logger has already been installed.
pub fn init_from_settings(global: &GlobalSettings) -> Result<(), log::SetLoggerError> {
    init_logger(level_from_str(&global.log_level))
}

/// Parse a level name from settings, falling back to `Info`.
#[must_use]
pub fn level_from_str(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}
