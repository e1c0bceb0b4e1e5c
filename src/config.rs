//! Command line and YAML configuration.
//!
//! The YAML file is optional; command line flags override whatever it sets.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Deserialize;

use crate::metrics::DEFAULT_BUCKETS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("--fallback requires a static root (--static-dir or static_files.root)")]
    FallbackWithoutRoot,
    #[error("{0} must be at least 1 second")]
    ZeroTimeout(&'static str),
}

/// spa-backend: demo API, request metrics and a single-page app from one port
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Param {
    /// 监听端口
    #[arg(long, short, value_name = "PORT")]
    pub port: Option<u16>,

    /// YAML 配置文件
    #[arg(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 静态文件根目录，设置后开启静态文件服务
    #[arg(long, value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// 未匹配路径返回的文档，相对于静态文件根目录
    #[arg(long, value_name = "FILE")]
    pub fallback: Option<String>,

    #[arg(long, help = "if set, /metrics and request timing are turned off")]
    pub disable_metrics: bool,

    /// 连接空闲超时（秒）
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// 请求超时（秒）
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<u64>,

    #[arg(long, value_name = "LEVEL", help = "log level of this crate, RUST_LOG takes precedence")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub port: u16,
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors: bool,
    pub log_level: String,
    pub metrics: MetricsConfig,
    pub static_files: Option<StaticFilesConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            idle_timeout_secs: 120,
            request_timeout_secs: 30,
            cors: true,
            log_level: "info".to_string(),
            metrics: MetricsConfig::default(),
            static_files: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticFilesConfig {
    pub root: PathBuf,
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_fallback() -> String {
    "index.html".to_string()
}

impl AppConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the optional config file, then apply command line overrides.
    pub fn from_param(param: &Param) -> Result<Self, ConfigError> {
        let mut config = match &param.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(port) = param.port {
            config.port = port;
        }
        if let Some(secs) = param.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if let Some(secs) = param.request_timeout {
            config.request_timeout_secs = secs;
        }
        if let Some(level) = &param.log_level {
            config.log_level = level.clone();
        }
        if param.disable_metrics {
            config.metrics.enabled = false;
        }
        if let Some(root) = &param.static_dir {
            let fallback = match &config.static_files {
                Some(existing) => existing.fallback.clone(),
                None => default_fallback(),
            };
            config.static_files = Some(StaticFilesConfig { root: root.clone(), fallback });
        }
        if let Some(fallback) = &param.fallback {
            match config.static_files.as_mut() {
                Some(static_files) => static_files.fallback = fallback.clone(),
                None => return Err(ConfigError::FallbackWithoutRoot),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// A zero timeout would close every connection (or answer 408) immediately.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("idle_timeout_secs"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("request_timeout_secs"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_backend() {
        let config = AppConfig::from_param(&Param::default()).unwrap();
        assert_eq!(config.port, 5000);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.buckets, DEFAULT_BUCKETS);
        assert!(config.static_files.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = AppConfig::from_yaml_str(
            "port: 8080\nmetrics:\n  buckets: [0.1, 0.5, 1]\nstatic_files:\n  root: ./frontend/dist\n",
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.buckets, vec![0.1, 0.5, 1.0]);
        let static_files = config.static_files.unwrap();
        assert_eq!(static_files.root, PathBuf::from("./frontend/dist"));
        assert_eq!(static_files.fallback, "index.html");
        assert_eq!(config.idle_timeout_secs, 120);
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        assert!(matches!(AppConfig::from_yaml_str("prot: 1\n"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn command_line_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");
        std::fs::write(&path, "port: 8080\nstatic_files:\n  root: /srv/a\n  fallback: app.html\n").unwrap();

        let param = Param::parse_from([
            "spa-backend",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9000",
            "--static-dir",
            "/srv/b",
            "--disable-metrics",
        ]);
        let config = AppConfig::from_param(&param).unwrap();
        assert_eq!(config.port, 9000);
        assert!(!config.metrics.enabled);
        assert_eq!(
            config.static_files,
            Some(StaticFilesConfig {
                root: PathBuf::from("/srv/b"),
                fallback: "app.html".to_string(),
            })
        );
    }

    #[test]
    fn fallback_needs_a_root() {
        let param = Param::parse_from(["spa-backend", "--fallback", "index.html"]);
        assert!(matches!(AppConfig::from_param(&param), Err(ConfigError::FallbackWithoutRoot)));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let param = Param::parse_from(["spa-backend", "--request-timeout", "0"]);
        assert!(matches!(
            AppConfig::from_param(&param),
            Err(ConfigError::ZeroTimeout("request_timeout_secs"))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");
        std::fs::write(&path, "idle_timeout_secs: 0\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::ZeroTimeout("idle_timeout_secs"))));

        let param = Param::parse_from(["spa-backend", "--idle-timeout", "5"]);
        let mut config = AppConfig::from_param(&param).unwrap();
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_reports_path() {
        let err = AppConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
