use clap::Parser;
use std::path::PathBuf;

use crate::config::CacheConfig;
use crate::sim::SourceSettings;
use crate::core::clock::ClockTime;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Source: synthetic (fixed rate)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Frame cache demo: synthetic source -> frame cache -> collecting sink
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Cache config JSON (default: framecache.json in the config directory)
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write the effective cache config back to the config file
    #[arg(long = "write-config")]
    pub write_config: bool,

    /// Duration soft limit in milliseconds
    #[arg(long = "duration-limit", value_name = "MS")]
    pub duration_limit: Option<u64>,

    /// Byte soft limit
    #[arg(long = "size-limit", value_name = "BYTES")]
    pub size_limit: Option<u64>,

    /// Track the byte limit without evicting by size
    #[arg(long = "no-size-limit")]
    pub no_size_limit: bool,

    /// Read-ahead per range request in milliseconds
    #[arg(long = "lookahead", value_name = "MS")]
    pub lookahead: Option<u64>,

    /// Consumer wait timeout in milliseconds
    #[arg(long = "wait-timeout", value_name = "MS")]
    pub wait_timeout: Option<u64>,

    /// Synthetic source frame rate
    #[arg(long = "fps", default_value_t = 25)]
    pub fps: u32,

    /// Synthetic frame payload size in bytes
    #[arg(long = "frame-size", value_name = "BYTES", default_value_t = 64 * 1024)]
    pub frame_size: usize,

    /// Synthetic media length in seconds
    #[arg(long = "media-duration", value_name = "SECS", default_value_t = 10.0)]
    pub media_duration: f64,

    /// Seek to this position in seconds (can be specified multiple times)
    #[arg(short = 's', long = "seek", value_name = "SECS")]
    pub seeks: Vec<f64>,

    /// Stop position for every seek in seconds
    #[arg(long = "seek-stop", value_name = "SECS")]
    pub seek_stop: Option<f64>,

    /// Wall-clock time to play after each seek in seconds
    #[arg(short = 'p', long = "play", value_name = "SECS", default_value_t = 2.0)]
    pub play: f64,

    /// Pace the sink like a display (one frame duration per frame)
    #[arg(short = 'r', long = "realtime")]
    pub realtime: bool,

    /// Print final statistics as JSON
    #[arg(long = "stats-json")]
    pub stats_json: bool,

    /// Enable debug logging to file (default: framecache.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    /// Command-line values win over the config file.
    pub fn apply_overrides(&self, config: &mut CacheConfig) {
        if let Some(ms) = self.duration_limit {
            config.duration_soft_limit_ms = ms;
        }
        if let Some(bytes) = self.size_limit {
            config.size_soft_limit = bytes;
        }
        if self.no_size_limit {
            config.enforce_size_limit = false;
        }
        if let Some(ms) = self.lookahead {
            config.lookahead_ms = ms;
        }
        if let Some(ms) = self.wait_timeout {
            config.wait_timeout_ms = ms;
        }
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            fps: self.fps.max(1),
            frame_size: self.frame_size,
            media_duration: ClockTime::from_seconds_f64(self.media_duration),
        }
    }

    /// Seek positions, starting at zero when none were given
    pub fn seek_positions(&self) -> Vec<ClockTime> {
        if self.seeks.is_empty() {
            return vec![ClockTime::ZERO];
        }
        self.seeks.iter().map(|&s| ClockTime::from_seconds_f64(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "framecache",
            "--duration-limit",
            "3000",
            "--no-size-limit",
            "-s",
            "1.5",
            "-s",
            "7",
        ]);
        let mut config = CacheConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.duration_soft_limit_ms, 3000);
        assert!(!config.enforce_size_limit);
        assert_eq!(config.lookahead_ms, 2000);
        assert_eq!(
            args.seek_positions(),
            vec![ClockTime::from_mseconds(1500), ClockTime::from_seconds(7)]
        );
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["framecache"]);
        assert_eq!(args.seek_positions(), vec![ClockTime::ZERO]);
        assert_eq!(args.source_settings().fps, 25);
        assert_eq!(args.source_settings().media_duration, ClockTime::from_seconds(10));
        assert!(args.log_file.is_none());
    }
}
