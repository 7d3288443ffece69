//! Watch mode for lectern: a notify watcher feeding debounced change
//! batches into the sync pipeline, one run at a time.
//!
//! Also owns [`init_tracing`], the subscriber every lectern binary installs.

mod batch;
mod error;
mod runtime;

pub use batch::Batcher;
pub use error::WatchError;
pub use runtime::{watch, watch_blocking, WatchConfig, WatchReport};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
/// Records from the library crates' `log` facade are bridged in. Calling
/// this twice is harmless.
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
