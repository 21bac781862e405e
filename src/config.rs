use crate::error::{Result, SyncError};
use crate::format::ts::{NULL_PID, TS_PACKET_SIZE};
use log::warn;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Default number of queued blocks required before output starts
pub const DEFAULT_ENOUGH_BLOCKS: usize = 10;
/// Default block count below which output is suspended
pub const DEFAULT_LOW_BLOCKS: usize = 5;
/// Default upper bound on the buffer size (8 MiB)
pub const DEFAULT_MAX_SIZE_MB: usize = 8;

const MAX_SIZE_MB_LIMIT: usize = 1024;

const CONFIG_PATHS: [&str; 2] = ["./tssync.toml", "./tssync_config.toml"];

/// Tuning knobs of a [`SyncBuffer`](crate::sync::SyncBuffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Blocks needed before leaving the buffering state
    pub enough_blocks: usize,
    /// Blocks below which the buffer underflows
    pub low_blocks: usize,
    /// Upper bound for the ring buffer, in bytes
    pub max_size_bytes: usize,
    /// Reference PID forced by configuration instead of being learned
    pub pcr_pid: Option<u16>,
    /// Display name used as log prefix
    pub name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enough_blocks: DEFAULT_ENOUGH_BLOCKS,
            low_blocks: DEFAULT_LOW_BLOCKS,
            max_size_bytes: DEFAULT_MAX_SIZE_MB * 1024 * 1024,
            pcr_pid: None,
            name: String::from("sync"),
        }
    }
}

impl SyncConfig {
    /// Builds a config from defaults, the first config file found and then
    /// `TSSYNC_*` environment variables. Bad entries are logged and skipped.
    pub fn load() -> Self {
        let mut config = SyncConfig::default();

        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.apply_file(&content);
                    break;
                }
            }
        }

        // Environment overrides the file
        if let Ok(opts) = env::var("TSSYNC_BUFFER") {
            if let Err(e) = config.parse_options(&opts) {
                warn!("[{}] ignoring TSSYNC_BUFFER: {}", config.name, e);
            }
        }
        if let Ok(pid) = env::var("TSSYNC_PCR_PID") {
            match parse_pid(&pid) {
                Ok(pid) => config.pcr_pid = Some(pid),
                Err(e) => warn!("[{}] ignoring TSSYNC_PCR_PID: {}", config.name, e),
            }
        }
        if let Ok(name) = env::var("TSSYNC_NAME") {
            if !name.is_empty() {
                config.name = name;
            }
        }

        config
    }

    /// Applies `key = value` lines from a config file.
    pub fn apply_file(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            let result = match key.trim() {
                "buffer" => self.parse_options(value),
                "pcr_pid" => parse_pid(value).map(|pid| self.pcr_pid = Some(pid)),
                "name" if !value.is_empty() => {
                    self.name = value.to_string();
                    Ok(())
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!("[{}] ignoring config line {:?}: {}", self.name, line, e);
            }
        }
    }

    /// Parses the compact `"enough,low,maxMB"` form. Empty fields keep the
    /// current value. On error the config is left untouched.
    pub fn parse_options(&mut self, opts: &str) -> Result<()> {
        let fields: Vec<&str> = opts.split(',').map(str::trim).collect();
        if fields.len() > 3 {
            return Err(SyncError::InvalidOptions(format!(
                "expected at most 3 fields, got {}",
                fields.len()
            )));
        }

        let mut enough = self.enough_blocks;
        let mut low = self.low_blocks;
        let mut max_bytes = self.max_size_bytes;

        if let Some(v) = fields.first().filter(|v| !v.is_empty()) {
            enough = v.parse()?;
        }
        if let Some(v) = fields.get(1).filter(|v| !v.is_empty()) {
            low = v.parse()?;
        }
        if let Some(v) = fields.get(2).filter(|v| !v.is_empty()) {
            let mb: usize = v.parse()?;
            validate_max_size_mb(mb)?;
            max_bytes = mb * 1024 * 1024;
        }

        validate_thresholds(enough, low)?;

        self.enough_blocks = enough;
        self.low_blocks = low;
        self.max_size_bytes = max_bytes;
        Ok(())
    }

    /// Maximum buffer size in packet slots.
    pub fn max_size_packets(&self) -> usize {
        self.max_size_bytes / TS_PACKET_SIZE
    }
}

pub(crate) fn validate_thresholds(enough: usize, low: usize) -> Result<()> {
    if enough == 0 || low == 0 {
        return Err(SyncError::InvalidOptions("block thresholds must be positive".into()));
    }
    if low > enough {
        return Err(SyncError::InvalidOptions(format!(
            "low blocks ({}) exceeds enough blocks ({})",
            low, enough
        )));
    }
    Ok(())
}

pub(crate) fn validate_max_size_mb(mb: usize) -> Result<()> {
    if mb == 0 || mb > MAX_SIZE_MB_LIMIT {
        return Err(SyncError::InvalidOptions(format!(
            "max size {} MB out of range 1..={}",
            mb, MAX_SIZE_MB_LIMIT
        )));
    }
    Ok(())
}

/// Only 13-bit PIDs below the null PID can carry a reference clock.
pub(crate) fn validate_pid(pid: u16) -> Result<u16> {
    if pid >= NULL_PID {
        return Err(SyncError::InvalidOptions(format!("PID {:#x} not usable as reference", pid)));
    }
    Ok(pid)
}

fn parse_pid(value: &str) -> Result<u16> {
    let value = value.trim();
    let pid = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => value.parse()?,
    };
    validate_pid(pid)
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        std::fs::write(path, CONFIG_TEMPLATE)?;
    }
    Ok(())
}

pub(crate) const CONFIG_TEMPLATE: &str = r#"# tssync Configuration
# This is a template. Replace the values with your actual configuration.

# Buffer thresholds as "enough_blocks,low_blocks,max_size_mb"
buffer = "10,5,8"

# Force the reference PID instead of learning it from the stream
# pcr_pid = 256

# Name used as log prefix
name = "sync"
"#;
