use env_logger::{Builder, Env};

/// `RUST_LOG` overrides the default `info` filter; `HANDCTL_LOG_STYLE`
/// takes `auto`, `always` or `never`.
pub fn init() {
    let env = Env::default()
        .default_filter_or("info")
        .write_style("HANDCTL_LOG_STYLE");
    Builder::from_env(env).format_timestamp_millis().init();
}
