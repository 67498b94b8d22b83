use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber once. Safe to call repeatedly;
/// later calls are no-ops.
pub fn init(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
