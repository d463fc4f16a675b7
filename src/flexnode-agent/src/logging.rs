use tracing_subscriber::EnvFilter;

/// Filter precedence: `RUST_LOG`, then the configured level, then `info`.
pub fn env_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| match configured {
            Some(level) if !level.trim().is_empty() => EnvFilter::try_new(level),
            _ => EnvFilter::try_new("info"),
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(configured: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(configured))
        .with_target(false)
        .try_init();
}
