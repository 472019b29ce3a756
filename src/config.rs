//! Runtime configuration
//!
//! Every setting can come from a command-line flag or the matching
//! environment variable; flags win.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::utils::error::{DetectorError, Result};
use crate::utils::logging::LogLevel;

/// Checkpoint file name looked up next to the executable when no path is given
pub const DEFAULT_MODEL_FILE: &str = "efficientnet_b0_deepfake.pth";

/// Default request body limit in MiB
pub const DEFAULT_MAX_UPLOAD_MB: usize = 20;

/// Default checkpoint location: beside the running binary, or the working directory
pub fn default_model_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_MODEL_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_FILE))
}

/// Server configuration
#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the model checkpoint
    #[arg(long, env = "MODEL_PATH", default_value_os_t = default_model_path())]
    pub model_path: PathBuf,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Maximum accepted request body, in MiB
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    pub max_upload_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Run on the CPU even when a GPU is available
    #[arg(long = "cpu", env = "FORCE_CPU")]
    pub force_cpu: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            log_level: "info".to_string(),
            force_cpu: false,
        }
    }
}

impl ServerConfig {
    /// Address the listener binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| DetectorError::Config(format!("Invalid listen address {}:{}: {}", self.host, self.port, e)))
    }

    /// Request body limit in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Parsed log level; unknown names fall back to info
    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ServerConfig,
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_upload_bytes(), 20 * 1024 * 1024);
        assert!(config.model_path.ends_with(DEFAULT_MODEL_FILE));
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--model-path",
            "/models/b0.mpk",
            "--port",
            "9000",
            "--host",
            "127.0.0.1",
            "--max-upload-mb",
            "5",
            "--cpu",
        ]);

        assert_eq!(cli.config.model_path, PathBuf::from("/models/b0.mpk"));
        assert_eq!(cli.config.socket_addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(cli.config.max_upload_bytes(), 5 * 1024 * 1024);
        assert!(cli.config.force_cpu);
    }

    #[test]
    fn test_invalid_values() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            log_level: "loud".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.socket_addr(), Err(DetectorError::Config(_))));
        assert_eq!(config.log_level(), LogLevel::Info);
    }
}
