use std::env;

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins when set; otherwise the
/// level is `info`, or `debug` for the workspace crates when verbose.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "info,docreview=debug,docreview_core=debug,docreview_rag=debug,docreview_skills=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if verbose {
        tracing::debug!("verbose logging enabled");
    }
}

/// Span tagging everything logged inside one pipeline stage.
pub fn stage(name: &'static str) -> Span {
    tracing::info_span!("stage", stage = name)
}

pub fn env_flag() -> bool {
    env::var("DOCREVIEW_VERBOSE")
        .map(|value| parse_bool(&value))
        .unwrap_or(false)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_truthy_values() {
        for raw in ["1", "true", " YES ", "on"] {
            assert!(parse_bool(raw), "{raw}");
        }
        for raw in ["0", "false", "", "maybe"] {
            assert!(!parse_bool(raw), "{raw}");
        }
    }
}
