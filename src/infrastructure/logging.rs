//! Logging configuration
//!
//! Initializes tracing for the application. `RUST_LOG` wins over the
//! configured level.

use tracing_subscriber::{EnvFilter, fmt};

/// Initializes logging with the specified level
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber set earlier (tests, embedding programs) stays in place
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("info");
    }
}
