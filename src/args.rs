use argp::FromArgs;
use core::time::Duration;
use jbdmon::{DeviceConfig, Format, Options, Timings};
use std::path::PathBuf;

#[cfg(feature = "tracing-subscriber")]
use tracing_subscriber::EnvFilter;

/// Multi-pack smart BMS monitor.
///
/// Polls every passed device over BLE and renders a combined state snapshot.
/// With -o, cell voltage samples are appended to one CSV file per device.
#[derive(FromArgs, Debug)]
pub struct Args {
    /// Show version and exit
    #[argp(switch, short = 'v')]
    pub version: bool,

    /// Logging filter (example: jbdmon=debug)
    #[cfg(feature = "tracing-subscriber")]
    #[argp(
        option,
        short = 'l',
        arg_name = "filter",
        from_str_fn(Args::parse_env_filter)
    )]
    pub log: Option<EnvFilter>,

    /// Enable log to journald (log to stderr by default)
    #[cfg(feature = "journal")]
    #[argp(switch, short = 'j')]
    pub journal: bool,

    /// Scan for BMS devices and exit
    #[argp(switch, short = 's')]
    pub scan: bool,

    /// Bluetooth scanning timeout in seconds (30 by default)
    #[argp(
        option,
        short = 't',
        arg_name = "seconds",
        default = "Duration::from_secs(30)",
        from_str_fn(Args::parse_duration)
    )]
    pub scan_timeout: Duration,

    /// Bluetooth request timeout in seconds (5 by default)
    #[argp(
        option,
        short = 'r',
        arg_name = "seconds",
        default = "Duration::from_secs(5)",
        from_str_fn(Args::parse_duration)
    )]
    pub request_timeout: Duration,

    /// Device to poll as name=ADDRESS[@revision], repeatable
    /// (address is a MAC or an advertised name; revision: gen1 gen2 gen3)
    #[argp(
        option,
        short = 'd',
        arg_name = "device",
        from_str_fn(core::str::FromStr::from_str)
    )]
    pub device: Vec<DeviceConfig>,

    /// Poll interval in seconds (5 by default)
    #[argp(
        option,
        short = 'p',
        arg_name = "seconds",
        default = "Duration::from_secs(5)",
        from_str_fn(Args::parse_duration)
    )]
    pub poll_interval: Duration,

    /// Settle delay after each command in milliseconds (500 by default)
    #[argp(
        option,
        arg_name = "millis",
        default = "Duration::from_millis(500)",
        from_str_fn(Args::parse_millis)
    )]
    pub settle_interval: Duration,

    /// Validate frame checksums (off by default, some firmwares send filler)
    #[argp(switch, short = 'C')]
    pub verify_checksum: bool,

    /// Directory for CSV sample logs (sample logging is off when not passed)
    #[argp(option, short = 'o', arg_name = "dir", from_str_fn(Args::parse_path))]
    pub log_dir: Option<PathBuf>,

    /// Snapshot refresh interval in seconds (1 by default)
    #[argp(
        option,
        arg_name = "seconds",
        default = "Duration::from_secs(1)",
        from_str_fn(Args::parse_duration)
    )]
    pub refresh_interval: Duration,

    /// Data format: text(x) (by default) rust(r) rust-pretty(R)
    #[cfg_attr(feature = "json", doc = "json(j) json-pretty(J)")]
    #[cfg_attr(feature = "yaml", doc = "yaml(y)")]
    #[cfg_attr(feature = "toml", doc = "toml(t) toml-pretty(T)")]
    #[argp(
        option,
        short = 'f',
        arg_name = "format",
        default = "Format::Text",
        from_str_fn(core::str::FromStr::from_str)
    )]
    pub format: Format,
}

impl Args {
    /// Create args from command-line
    pub fn from_cmdline() -> Self {
        argp::parse_args_or_exit(argp::DEFAULT)
    }

    /// Get log filter
    #[cfg(feature = "tracing-subscriber")]
    pub fn log_filter(&self) -> Option<EnvFilter> {
        self.log
            .as_ref()
            .and_then(|log| log.to_string().parse().ok())
    }

    /// Need to do some action
    pub fn has_action(&self) -> bool {
        self.scan || !self.device.is_empty()
    }

    /// Client options
    pub fn client_options(&self) -> Options {
        Options {
            scan_timeout: self.scan_timeout,
            request_timeout: self.request_timeout,
        }
    }

    /// Session timings
    pub fn timings(&self) -> Timings {
        Timings {
            settle: self.settle_interval,
            poll: self.poll_interval,
            ..Timings::default()
        }
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        s.parse::<u32>()
            .map(|seconds| Duration::from_secs(seconds as _))
            .map_err(|error| format!("Bad timeout value: {error}"))
    }

    fn parse_millis(s: &str) -> Result<Duration, String> {
        s.parse::<u32>()
            .map(|millis| Duration::from_millis(millis as _))
            .map_err(|error| format!("Bad interval value: {error}"))
    }

    fn parse_path(s: &str) -> Result<PathBuf, String> {
        Ok(PathBuf::from(s))
    }

    #[cfg(feature = "tracing-subscriber")]
    fn parse_env_filter(s: &str) -> Result<EnvFilter, String> {
        s.parse()
            .map_err(|error| format!("Bad tracing filter: {error}"))
    }
}
