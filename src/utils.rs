use anyhow::Result;
use chrono::{DateTime, Local};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;

// Logging and terminal prompt helpers for the binary.

// The HTTP and websocket stacks log every frame and handshake at debug level.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "rustls", "tungstenite", "tokio_tungstenite", "mio"];
const QUIET_TARGET_LEVEL: LevelFilter = LevelFilter::Info;

fn is_quiet_target(target: &str) -> bool {
    QUIET_TARGETS
        .iter()
        .any(|quiet| target == *quiet || target.starts_with(&format!("{}::", quiet)))
}

pub struct SimpleLogger {
    log_file: Option<std::fs::File>,
}

impl SimpleLogger {
    pub fn new(log_file_path: Option<&str>) -> Result<Self> {
        let log_file = if let Some(path) = log_file_path {
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        } else {
            None
        };

        Ok(SimpleLogger { log_file })
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if is_quiet_target(metadata.target()) {
            return metadata.level() <= QUIET_TARGET_LEVEL.min(log::max_level());
        }
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now: DateTime<Local> = Local::now();
        let log_message = format!(
            "[{}] {} [{}:{}] {}\n",
            now.format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        );

        match &self.log_file {
            Some(file) => {
                if let Ok(mut file) = file.try_clone() {
                    let _ = file.write_all(log_message.as_bytes());
                }
            }
            // The TUI owns stdout, so without a file we fall back to stderr.
            None => eprint!("{}", log_message),
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.log_file {
            if let Ok(mut file) = file.try_clone() {
                let _ = file.flush();
            }
        }
    }
}

/// Read a line of input from stdin, trimming whitespace
pub fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    let logger = SimpleLogger::new(log_file)?;
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;

    log::info!("Logging initialized at level: {}", level);
    log::info!("App version: {} ({})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_NAME"));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_crates_are_quiet() {
        assert!(is_quiet_target("tungstenite::protocol"));
        assert!(is_quiet_target("hyper"));
        assert!(!is_quiet_target("hyperion"));
        assert!(!is_quiet_target("volunteer_messenger::store::realtime"));
    }
}
