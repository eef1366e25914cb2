pub mod artifacts;
pub mod config;
pub mod dom;
pub mod errors;
pub mod failure;
pub mod heal;
pub mod labels;
pub mod llm;
pub mod locator;
pub mod page;
pub mod pipeline;
pub mod resolve;

pub use errors::{HealError, HealResult};
pub use pipeline::{FailureHandler, FailureOutcome, Oracles};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (e.g. `info`,
/// `locator_heal=debug`) is used. Calling it twice is harmless.
pub fn init_tracing(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .try_init();
}
