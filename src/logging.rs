use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "brewery_pipeline=info";

/// Initializes the logging system with both console and file output.
///
/// The file layer writes JSON lines to a daily-rotated `pipeline.log` under
/// `log_dir`. `RUST_LOG` overrides the default filter.
pub fn init_logging(log_dir: &Path) {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Could not create log folder {}: {}", log_dir.display(), e);
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "pipeline.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = match DEFAULT_DIRECTIVE.parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };

    // a second init (tests, repeated CLI calls) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // flushes on drop, so it has to outlive main
    std::mem::forget(guard);
}
