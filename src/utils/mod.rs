use log::info;

/// Installs the process logger on stderr. Call once from a binary; the library never does.
pub fn setup_logging(level: log::LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("redis", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;
    info!("Logging initialized.");
    Ok(())
}

/// Parses a `--log-level` style value, defaulting to `Info` for anything unknown.
pub fn parse_level(value: &str) -> log::LevelFilter {
    value.parse().unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_names_case_insensitively() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("chatty"), log::LevelFilter::Info);
    }
}
