//! 日志初始化

use tracing_subscriber::EnvFilter;

use crate::infrastructure::config::LoggingSettings;

/**
 * 安装全局 tracing 订阅者
 *
 * `RUST_LOG` 存在时优先于配置中的级别。已经安装过订阅者时返回 `false`。
 */
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}
