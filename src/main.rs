mod console_host;

use sanae_bridge::prelude::*;
use std::sync::Arc;
use tracing::error;

use console_host::ConsoleHost;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigManager::new("config.toml").load().await?;
    sanae_bridge::log::init(config.log);

    let host = Arc::new(ConsoleHost::default());
    let bridge = Bridge::new(config);
    // 配置错误只影响转发，控制台照常运行
    if let Err(e) = bridge.on_bot_status(host.clone(), true) {
        error!(target: "Bridge", "转接层启动失败: {}", e);
    }

    host.run(&bridge).await;

    bridge.dispose();
    Ok(())
}
