use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use time::{format_description::parse, OffsetDateTime, UtcOffset};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Install a global subscriber writing every event to a timestamped file in the working
/// directory. Returns the file path.
///
/// Fails if another global subscriber is already installed.
pub fn init_logger() -> anyhow::Result<PathBuf> {
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let path = PathBuf::from(get_log_file_name(local_offset)?);
    let file = File::create(&path)
        .with_context(|| format!("could not create log file {}", path.display()))?;
    let writer = BoxMakeWriter::new(file);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        parse("[year]-[month]-[day] [hour]:[minute]:[second]")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "could not set global default tracing subscriber, consider disabling logs if you are \
         already setting a subscriber",
    )?;
    Ok(path)
}

fn get_log_file_name(offset: UtcOffset) -> anyhow::Result<String> {
    let format = parse("arena_[year]-[month]-[day]_[hour]-[minute]-[second]_log.txt")?;
    let now = OffsetDateTime::now_utc().to_offset(offset);
    Ok(now.format(&format)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_is_timestamped() {
        let name = get_log_file_name(UtcOffset::UTC).unwrap();
        assert!(name.starts_with("arena_20"));
        assert!(name.ends_with("_log.txt"));
        assert!(!name.contains(':'));
    }
}
