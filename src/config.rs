use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

use crate::{BridgeError, BridgeResult};

/// 转接层配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeConfig {
    // 反向 WS 服务端地址（不含端口）
    #[serde(default = "default_path")]
    pub path: String,

    // 反向 WS 服务端端口
    #[serde(default = "default_port")]
    pub port: String,

    // 是否以 INFO 级别打印收发的帧
    #[serde(default)]
    pub log: bool,

    // 额外的完整端点地址，例如 "ws://10.0.0.2:6700"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_endpoints: Vec<String>,
}

fn default_path() -> String {
    "ws://127.0.0.1".to_string()
}

fn default_port() -> String {
    "20002".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            port: default_port(),
            log: false,
            extra_endpoints: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// 主端点 `<path>:<port>`
    pub fn endpoint(&self) -> BridgeResult<String> {
        validate_endpoint(&format!("{}:{}", self.path, self.port))
    }

    /// 全部端点，主端点在前
    pub fn endpoints(&self) -> BridgeResult<Vec<String>> {
        let mut list = vec![self.endpoint()?];
        for extra in &self.extra_endpoints {
            let url = validate_endpoint(extra)?;
            if !list.contains(&url) {
                list.push(url);
            }
        }
        Ok(list)
    }
}

fn validate_endpoint(raw: &str) -> BridgeResult<String> {
    let url = Url::parse(raw)
        .map_err(|e| BridgeError::Config(format!("无效的端点地址 {}: {}", raw, e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(BridgeError::Config(format!(
                "端点 {} 的协议 {} 不受支持，仅支持 ws/wss",
                raw, other
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(BridgeError::Config(format!("端点 {} 缺少主机名", raw)));
    }

    Ok(url.to_string())
}

/// 配置管理器
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载配置，如果文件不存在则写入并返回默认配置
    pub async fn load(&self) -> BridgeResult<BridgeConfig> {
        if !self.path.exists() {
            let default_cfg = BridgeConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let cfg: BridgeConfig = toml::from_str(&content)?;
        Ok(cfg)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &BridgeConfig) -> BridgeResult<()> {
        let content = toml::to_string_pretty(cfg)?;
        let path = self.path.clone();
        let tmp_path = self.path.with_extension("tmp");

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.endpoint().unwrap(), "ws://127.0.0.1:20002/");
        assert!(!cfg.log);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: BridgeConfig = toml::from_str("port = \"6700\"").unwrap();
        assert_eq!(cfg.path, "ws://127.0.0.1");
        assert_eq!(cfg.port, "6700");
        assert!(cfg.extra_endpoints.is_empty());
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        let cfg = BridgeConfig {
            path: "http://example.com".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.endpoint(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn rejects_bad_port() {
        let cfg = BridgeConfig {
            port: "not-a-port".into(),
            ..Default::default()
        };
        assert!(cfg.endpoint().is_err());
    }

    #[test]
    fn extra_endpoints_follow_primary_without_duplicates() {
        let cfg = BridgeConfig {
            extra_endpoints: vec![
                "wss://bot.example.com/onebot".into(),
                "ws://127.0.0.1:20002".into(),
            ],
            ..Default::default()
        };
        assert_eq!(
            cfg.endpoints().unwrap(),
            vec![
                "ws://127.0.0.1:20002/".to_string(),
                "wss://bot.example.com/onebot".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("config.toml"));

        let cfg = manager.load().await.unwrap();
        assert_eq!(cfg, BridgeConfig::default());
        assert!(manager.path().exists());

        let again = manager.load().await.unwrap();
        assert_eq!(again, cfg);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("nested").join("bridge.toml"));
        let cfg = BridgeConfig {
            path: "wss://onebot.example.com".into(),
            port: "443".into(),
            log: true,
            extra_endpoints: vec!["ws://10.0.0.2:6700".into()],
        };

        manager.save_atomic(&cfg).await.unwrap();
        assert_eq!(manager.load().await.unwrap(), cfg);
        assert!(!manager.path().with_extension("tmp").exists());
    }
}
