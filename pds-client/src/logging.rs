//! Tracing subscriber setup
//!
//! The subscriber is installed before the config file is read so that
//! config warnings are visible. The `[logging] level` from the file is
//! applied afterwards through a reload handle, unless `RUST_LOG` already
//! chose the filter.

use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Level used until the config file has been read
const STARTUP_LEVEL: &str = "info";

/// Filter directives for the pds crates at `level`
pub fn default_filter(level: &str) -> String {
    format!("pds_client={level},pds_common={level}")
}

/// Switches the active filter once configuration is known
pub struct LogFilterHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogFilterHandle {
    /// Apply the configured level; a `RUST_LOG` filter is left in place
    pub fn apply_level(&self, level: &str) {
        if self.from_env {
            return;
        }
        if let Err(e) = self.handle.reload(EnvFilter::new(default_filter(level))) {
            warn!("Could not apply log level {}: {}", level, e);
        }
    }
}

/// Build the layered subscriber writing to `make_writer`
///
/// `env_filter` wins over the startup level when given.
pub fn build<W>(
    make_writer: W,
    env_filter: Option<EnvFilter>,
) -> (impl tracing::Subscriber + Send + Sync, LogFilterHandle)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let from_env = env_filter.is_some();
    let filter = env_filter.unwrap_or_else(|| EnvFilter::new(default_filter(STARTUP_LEVEL)));
    let (filter, handle) = reload::Layer::new(filter);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer));

    (subscriber, LogFilterHandle { handle, from_env })
}

/// Install the global subscriber on stderr
pub fn init() -> LogFilterHandle {
    let (subscriber, handle) = build(std::io::stderr, EnvFilter::try_from_default_env().ok());
    subscriber.init();
    handle
}
