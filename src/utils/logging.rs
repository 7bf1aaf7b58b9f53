// file: src/utils/logging.rs
// description: tracing subscriber setup and colored cli status lines
// reference: https://docs.rs/tracing-subscriber

use crate::models::TaskStatus;
use colored::*;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// HTTP client internals log every connection at debug level.
const QUIET_TARGETS: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

fn default_directives(verbose: bool) -> String {
    let level = if verbose {
        "visual_engine=debug,info"
    } else {
        "info"
    };
    format!("{},{}", level, QUIET_TARGETS)
}

/// Logs go to stderr so command output on stdout stays scriptable.
/// `RUST_LOG` overrides the default filter.
pub fn init_logger(colored_output: bool, verbose: bool) {
    colored::control::set_override(colored_output);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact()
        .with_ansi(colored_output);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

pub fn format_success(msg: &str) -> String {
    format!("{} {}", "✓".green().bold(), msg.green())
}

pub fn format_error(msg: &str) -> String {
    format!("{} {}", "✗".red().bold(), msg.red())
}

pub fn format_warning(msg: &str) -> String {
    format!("{} {}", "⚠".yellow().bold(), msg.yellow())
}

pub fn format_info(msg: &str) -> String {
    format!("{} {}", "ℹ".blue().bold(), msg)
}

pub fn format_status(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Processing => status.as_str().cyan(),
        TaskStatus::Completed => status.as_str().green().bold(),
        TaskStatus::Failed => status.as_str().red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http() {
        let quiet = default_directives(false);
        assert!(quiet.starts_with("info,"));
        assert!(quiet.contains("reqwest=warn"));
        assert!(default_directives(true).starts_with("visual_engine=debug"));
        assert!(EnvFilter::try_new(default_directives(true)).is_ok());
    }

    #[test]
    fn test_status_lines_keep_message() {
        colored::control::set_override(false);
        assert_eq!(format_success("done"), "✓ done");
        assert_eq!(format_error("boom"), "✗ boom");
        assert_eq!(format_status(TaskStatus::Failed).to_string(), "failed");
    }
}
