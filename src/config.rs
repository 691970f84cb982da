//! Gateway configuration

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Personal baseball streaming gateway configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "dugout")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind the gateway server to.
    #[arg(short = 'b', long, default_value = "0.0.0.0:9990")]
    pub bind: SocketAddr,

    /// Address to bind the multiview static file server to.
    #[arg(long, default_value = "0.0.0.0:9991")]
    pub multiview_bind: SocketAddr,

    /// Data directory for credentials, session state and the cache.
    #[arg(short = 'd', long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Path to the ffmpeg binary used by the multiview composer.
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Working directory for multiview HLS output. Defaults to
    /// `<data_dir>/multiview`.
    #[arg(long)]
    pub multiview_dir: Option<PathBuf>,

    /// File name of the multiview master playlist inside the working
    /// directory.
    #[arg(long, default_value = "multiview.m3u8")]
    pub multiview_playlist: String,

    /// Account username. Only needed once; it is persisted to
    /// `credentials.json` in the data directory.
    #[arg(long)]
    pub username: Option<String>,

    /// Account password, persisted alongside the username.
    #[arg(long)]
    pub password: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Resolved multiview working directory.
    pub fn multiview_dir(&self) -> PathBuf {
        self.multiview_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("multiview"))
    }

    /// Cache directory inside the data directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.ffmpeg_path.is_empty() {
            return Err("ffmpeg path must not be empty".to_string());
        }

        if self.username.is_some() != self.password.is_some() {
            return Err("--username and --password must be provided together".to_string());
        }

        if self.multiview_playlist.is_empty() || self.multiview_playlist.contains('/') {
            return Err("multiview playlist must be a bare file name".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::parse_from(["dugout"])
    }

    #[test]
    fn test_default_config() {
        let config = base_config();
        assert_eq!(config.bind.port(), 9990);
        assert_eq!(config.multiview_bind.port(), 9991);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_multiview_dir_default() {
        let config = base_config();
        assert_eq!(config.multiview_dir(), PathBuf::from("data/multiview"));
    }

    #[test]
    fn test_validate_credentials_pairing() {
        let mut config = base_config();
        config.username = Some("user@example.com".to_string());
        assert!(config.validate().is_err());

        config.password = Some("hunter2".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_playlist_name() {
        let mut config = base_config();
        config.multiview_playlist = "nested/master.m3u8".to_string();
        assert!(config.validate().is_err());
    }
}
