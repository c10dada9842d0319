//! Terminal capabilities and tracing setup.

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_progress_bar(
    stderr_is_terminal: bool,
    quiet: bool,
    json: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !json && !dumb_terminal
}

/// Default filter directive.
///
/// Priority: `RUST_LOG` (applied in [`init_tracing`]) > quiet > verbose > info.
pub(crate) fn resolve_default_log_level(quiet: bool, verbose: u8) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let no_color = no_color_env_requested() || is_dumb_terminal();
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(resolve_default_log_level(true, 2), "error");
        assert_eq!(resolve_default_log_level(false, 0), "info");
        assert_eq!(resolve_default_log_level(false, 1), "debug");
        assert_eq!(resolve_default_log_level(false, 5), "trace");
    }

    #[test]
    fn test_progress_bar_only_on_interactive_text_output() {
        assert!(should_use_progress_bar(true, false, false, false));
        assert!(!should_use_progress_bar(false, false, false, false));
        assert!(!should_use_progress_bar(true, true, false, false));
        assert!(!should_use_progress_bar(true, false, true, false));
        assert!(!should_use_progress_bar(true, false, false, true));
    }
}
