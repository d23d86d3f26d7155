//! Process-wide tracing setup.
//!
//! Output is a span tree on stderr. `RUST_LOG` overrides the default filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_tree::HierarchicalLayer;
use tracing_tree::time::Uptime;

pub const DEFAULT_FILTER: &str = "blurred=info,warn";

pub fn filter_from_env(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "blurred=debug,info" } else { DEFAULT_FILTER };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

pub fn init_logging(verbose: bool) {
    let tree = HierarchicalLayer::default()
        .with_writer(std::io::stderr)
        .with_indent_amount(2)
        .with_indent_lines(true)
        .with_targets(true)
        .with_bracketed_fields(true)
        .with_timer(Uptime::default());

    // A subscriber may already be installed by a test harness.
    _ = tracing_subscriber::registry().with(filter_from_env(verbose)).with(tree).try_init();
}
