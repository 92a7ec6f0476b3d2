use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Root URL of the API, used to build follow/artifact URLs.
    pub api_domain: String,
    /// Directory in which capture artifacts are (temporarily) stored.
    pub storage_path: PathBuf,
    /// How long artifacts are kept on disk before the sweeper removes them.
    pub storage_expiration_secs: u64,
    /// The capture tool's own scratch directory. The tool is known to leave
    /// temporary folders behind there, so the sweeper covers it too.
    pub tool_scratch_path: PathBuf,
    /// Stop accepting new capture requests past this many pending captures.
    pub max_pending_captures: i64,
    /// Salt mixed into access-key digests.
    pub access_key_salt: String,
    /// How many capture worker processes the supervisor runs.
    pub processes: u16,
    /// Proxy port for the first worker; worker N binds base + N.
    pub proxy_port_base: u16,
    /// Grace period added on top of the tool's capture timeout before the
    /// subprocess is considered hung and killed.
    pub capture_timeout_fuse_secs: u64,
    /// Expose captured stdout/stderr in the public representation.
    pub expose_tool_logs: bool,
    /// Expose the tool's capture summary in the public representation.
    pub expose_capture_summary: bool,
    /// Command used to invoke the capture tool, e.g. ["npx", "scoop"].
    pub capture_tool_command: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            api_domain: env::var("API_DOMAIN")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            storage_path: env::var("STORAGE_PATH")
                .unwrap_or_else(|_| "./storage".to_string())
                .into(),
            storage_expiration_secs: env::var("STORAGE_EXPIRATION_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("STORAGE_EXPIRATION_SECS must be a valid number")?,
            tool_scratch_path: env::var("TOOL_SCRATCH_PATH")
                .unwrap_or_else(|_| "node_modules/@harvard-lil/scoop/tmp".to_string())
                .into(),
            max_pending_captures: env::var("MAX_PENDING_CAPTURES")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("MAX_PENDING_CAPTURES must be a valid number")?,
            access_key_salt: env::var("ACCESS_KEY_SALT").context("ACCESS_KEY_SALT must be set")?,
            processes: env::var("PROCESSES")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("PROCESSES must be a valid number")?,
            proxy_port_base: env::var("PROCESSES_PROXY_PORT")
                .unwrap_or_else(|_| "9000".to_string())
                .parse()
                .context("PROCESSES_PROXY_PORT must be a valid number")?,
            capture_timeout_fuse_secs: env::var("CAPTURE_TIMEOUT_FUSE_SECS")
                .unwrap_or_else(|_| "45".to_string())
                .parse()
                .context("CAPTURE_TIMEOUT_FUSE_SECS must be a valid number")?,
            expose_tool_logs: env::var("EXPOSE_TOOL_LOGS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            expose_capture_summary: env::var("EXPOSE_CAPTURE_SUMMARY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            capture_tool_command: env::var("CAPTURE_TOOL_COMMAND")
                .unwrap_or_else(|_| "npx scoop".to_string())
                .split_whitespace()
                .map(String::from)
                .collect(),
        })
    }

    /// Hard wall-clock budget for one capture subprocess: the tool's own
    /// capture timeout plus the supervisory fuse.
    pub fn capture_wall_clock_budget(&self, options: &CaptureToolOptions) -> Duration {
        Duration::from_millis(options.capture_timeout_ms) +
            Duration::from_secs(self.capture_timeout_fuse_secs)
    }
}

/// Static operational flag set passed to the capture tool on every run.
///
/// These are deployment-level choices, not per-capture inputs, so they live
/// here rather than on the capture record.
#[derive(Debug, Clone)]
pub struct CaptureToolOptions {
    pub log_level: String,
    pub screenshot: bool,
    pub pdf_snapshot: bool,
    pub dom_snapshot: bool,
    pub capture_video_as_attachment: bool,
    pub capture_certificates_as_attachment: bool,
    pub provenance_summary: bool,
    pub attachments_bypass_limits: bool,
    pub capture_timeout_ms: u64,
    pub load_timeout_ms: u64,
    pub network_idle_timeout_ms: u64,
    pub behaviors_timeout_ms: u64,
    pub capture_video_as_attachment_timeout_ms: u64,
    pub capture_certificates_as_attachment_timeout_ms: u64,
    pub capture_window_x: u32,
    pub capture_window_y: u32,
    pub max_capture_size: u64,
    pub auto_scroll: bool,
    pub auto_play_media: bool,
    pub grab_secondary_resources: bool,
    pub run_site_specific_behaviors: bool,
    pub headless: bool,
    /// CIDR blocklist keeping captures away from loopback/private ranges.
    pub blocklist: String,
    pub public_ip_resolver_endpoint: String,
}

impl Default for CaptureToolOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            screenshot: true,
            pdf_snapshot: false,
            dom_snapshot: false,
            capture_video_as_attachment: true,
            capture_certificates_as_attachment: true,
            provenance_summary: true,
            attachments_bypass_limits: true,
            capture_timeout_ms: 50_000,
            load_timeout_ms: 25_000,
            network_idle_timeout_ms: 25_000,
            behaviors_timeout_ms: 15_000,
            capture_video_as_attachment_timeout_ms: 20_000,
            capture_certificates_as_attachment_timeout_ms: 10_000,
            capture_window_x: 1600,
            capture_window_y: 900,
            max_capture_size: 200 * 1024 * 1024,
            auto_scroll: true,
            auto_play_media: true,
            grab_secondary_resources: true,
            run_site_specific_behaviors: true,
            // Note: `xvfb-run --auto-servernum --` prefix may be needed if false.
            headless: false,
            blocklist: "/https?:\\/\\/localhost/,0.0.0.0/8,10.0.0.0/8,100.64.0.0/10,127.0.0.0/8,169.254.0.0/16,172.16.0.0/12,192.0.0.0/29,192.0.2.0/24,192.88.99.0/24,192.168.0.0/16,198.18.0.0/15,198.51.100.0/24,203.0.113.0/24,224.0.0.0/4,240.0.0.0/4,255.255.255.255/32,::/128,::1/128,::ffff:0:0/96,100::/64,64:ff9b::/96,2001::/32,2001:10::/28,2001:db8::/32,2002::/16,fc00::/7,fe80::/10,ff00::/8".to_string(),
            public_ip_resolver_endpoint: "https://icanhazip.com".to_string(),
        }
    }
}

impl CaptureToolOptions {
    /// Render the option set as CLI flag/value pairs.
    pub fn to_args(&self) -> Vec<String> {
        let bool_str = |b: bool| if b { "true" } else { "false" }.to_string();

        let pairs: Vec<(&str, String)> = vec![
            ("--log-level", self.log_level.clone()),
            ("--screenshot", bool_str(self.screenshot)),
            ("--pdf-snapshot", bool_str(self.pdf_snapshot)),
            ("--dom-snapshot", bool_str(self.dom_snapshot)),
            (
                "--capture-video-as-attachment",
                bool_str(self.capture_video_as_attachment),
            ),
            (
                "--capture-certificates-as-attachment",
                bool_str(self.capture_certificates_as_attachment),
            ),
            ("--provenance-summary", bool_str(self.provenance_summary)),
            (
                "--attachments-bypass-limits",
                bool_str(self.attachments_bypass_limits),
            ),
            ("--capture-timeout", self.capture_timeout_ms.to_string()),
            ("--load-timeout", self.load_timeout_ms.to_string()),
            (
                "--network-idle-timeout",
                self.network_idle_timeout_ms.to_string(),
            ),
            ("--behaviors-timeout", self.behaviors_timeout_ms.to_string()),
            (
                "--capture-video-as-attachment-timeout",
                self.capture_video_as_attachment_timeout_ms.to_string(),
            ),
            (
                "--capture-certificates-as-attachment-timeout",
                self.capture_certificates_as_attachment_timeout_ms.to_string(),
            ),
            ("--capture-window-x", self.capture_window_x.to_string()),
            ("--capture-window-y", self.capture_window_y.to_string()),
            ("--max-capture-size", self.max_capture_size.to_string()),
            ("--auto-scroll", bool_str(self.auto_scroll)),
            ("--auto-play-media", bool_str(self.auto_play_media)),
            (
                "--grab-secondary-resources",
                bool_str(self.grab_secondary_resources),
            ),
            (
                "--run-site-specific-behaviors",
                bool_str(self.run_site_specific_behaviors),
            ),
            ("--headless", bool_str(self.headless)),
            ("--blocklist", self.blocklist.clone()),
            (
                "--public-ip-resolver-endpoint",
                self.public_ip_resolver_endpoint.clone(),
            ),
        ];

        pairs
            .into_iter()
            .flat_map(|(flag, value)| [flag.to_string(), value])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_options_render_as_flag_value_pairs() {
        let args = CaptureToolOptions::default().to_args();
        assert_eq!(args.len() % 2, 0);

        let capture_timeout_pos = args
            .iter()
            .position(|a| a == "--capture-timeout")
            .expect("capture timeout flag present");
        assert_eq!(args[capture_timeout_pos + 1], "50000");

        let headless_pos = args.iter().position(|a| a == "--headless").unwrap();
        assert_eq!(args[headless_pos + 1], "false");
    }

    #[test]
    fn test_wall_clock_budget_adds_fuse() {
        let options = CaptureToolOptions::default();
        let config = Config {
            database_url: "postgres://localhost/test".to_string(),
            port: 5000,
            api_domain: "http://localhost:5000".to_string(),
            storage_path: "./storage".into(),
            storage_expiration_secs: 86_400,
            tool_scratch_path: "./tmp".into(),
            max_pending_captures: 300,
            access_key_salt: "salt".to_string(),
            processes: 6,
            proxy_port_base: 9000,
            capture_timeout_fuse_secs: 45,
            expose_tool_logs: false,
            expose_capture_summary: true,
            capture_tool_command: vec!["npx".to_string(), "scoop".to_string()],
        };

        assert_eq!(
            config.capture_wall_clock_budget(&options),
            Duration::from_secs(95)
        );
    }
}
