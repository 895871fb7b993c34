use anyhow::Result;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Install a stderr subscriber. `RUST_LOG` directives extend `filter`,
/// which defaults to `info`. Command output goes to stdout and stays clean.
pub fn init(filter: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive(filter)?)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
    Ok(())
}

fn directive(filter: Option<&str>) -> Result<Directive> {
    Ok(filter.unwrap_or(DEFAULT_FILTER).parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_to_info() {
        assert_eq!(directive(None).expect("default").to_string(), "info");
        assert_eq!(
            directive(Some("taskdeck_core=debug")).expect("explicit").to_string(),
            "taskdeck_core=debug"
        );
    }

    #[test]
    fn rejects_malformed_directive() {
        assert!(directive(Some("taskdeck=loud")).is_err());
    }
}
