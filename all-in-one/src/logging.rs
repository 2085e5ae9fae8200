use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// 安装全局日志；`RUST_LOG` 优先于配置里的级别
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow!("Invalid log filter {}: {}", level, e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

#[test]
fn test_init_tracing_once() -> Result<()> {
    init_tracing("debug")?;
    tracing::debug!("logging ready");
    assert!(init_tracing("info").is_err());
    Ok(())
}
