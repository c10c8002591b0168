use log::LevelFilter;

/// Initializes the global logger. `verbosity` is the floor set by the `--verbosity` CLI flag;
/// the `RUST_LOG` environment variable, if set, takes precedence over it.
pub fn init(verbosity: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(verbosity)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}
