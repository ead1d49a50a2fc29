pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod rate_limit;
pub mod selector;
pub mod sender;

pub use crate::config::DispatchConfig;
pub use crate::dispatch::{send, DispatchContext, SendRequest, SendResponse, StatusCode};
pub use crate::error::{DispatchError, Result};
pub use crate::filter::{Filter, FilterFlow, FilterRegistry, GLOBAL_CATEGORY};
pub use crate::selector::{RandomSelector, Selector};
pub use crate::sender::{ResponseWriter, Sender};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatcher=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
