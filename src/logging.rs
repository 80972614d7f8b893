//! Process-wide logger setup

use env_logger::Env;

pub const DEFAULT_FILTER: &str = "info";

/// Install the `log` backend. `RUST_LOG` overrides the default filter.
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let env = Env::default().default_filter_or(DEFAULT_FILTER);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_ok()
    {
        log::debug!("logger initialized");
    }
}
