use crate::Result;
use tracing_subscriber::EnvFilter;

fn filter(level: &str, verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("nova_lifecycle=debug,nova_lifecycle::enabler=trace")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("nova_lifecycle={}", level)))
    }
}

pub fn init_logging(level: &str, verbose: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level, verbose))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

pub fn init_file_logging(log_file: &std::path::Path, level: &str, verbose: bool) -> Result<()> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(level, verbose))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
