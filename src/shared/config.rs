//! Application configuration. Mirrors the five JSON sections the core
//! consumes: `GENERAL`, `DOWNLOAD`, `UPLOAD`, `FORWARD`, `MONITOR`.
//!
//! The `config` crate layers a JSON file source under environment
//! overrides, and `dotenv` loads a local `.env` before either is read.
//! Defaults are `Default` impls / `_or_default()` accessors.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyType {
    Socks5,
    Http,
    #[serde(rename = "MTProto")]
    MtProto,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneralConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub phone_number: String,
    #[serde(default)]
    pub limit: u32,
    #[serde(default = "default_pause_time")]
    pub pause_time: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub proxy_enabled: bool,
    pub proxy_type: Option<ProxyType>,
    pub proxy_addr: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
}

fn default_pause_time() -> u64 {
    60
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            phone_number: String::new(),
            limit: 0,
            pause_time: default_pause_time(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            proxy_enabled: false,
            proxy_type: None,
            proxy_addr: None,
            proxy_port: None,
            proxy_username: None,
            proxy_password: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadSetting {
    pub source_channels: Vec<String>,
    #[serde(default)]
    pub start_id: i32,
    pub end_id: Option<i32>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub media_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadConfig {
    #[serde(default)]
    pub download_setting: Vec<DownloadSetting>,
    #[serde(default = "default_download_path")]
    pub download_path: String,
    #[serde(default)]
    pub parallel_download: bool,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: u32,
    #[serde(default)]
    pub dir_size_limit_enabled: bool,
    #[serde(default = "default_dir_size_limit")]
    pub dir_size_limit: u64,
}

fn default_download_path() -> String {
    "downloads".into()
}
fn default_max_concurrent_downloads() -> u32 {
    5
}
fn default_dir_size_limit() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadOptions {
    #[serde(default)]
    pub use_folder_name: bool,
    #[serde(default)]
    pub read_title_txt: bool,
    #[serde(default)]
    pub send_final_message: bool,
    pub final_message_html_file: Option<String>,
    #[serde(default)]
    pub enable_web_page_preview: bool,
    #[serde(default)]
    pub auto_thumbnail: bool,
}

impl UploadOptions {
    /// The loader's mutual-exclusion check: a folder caption and a
    /// `title.txt` caption cannot both be requested.
    pub fn validate(&self) -> Result<(), crate::domain::DomainError> {
        if self.use_folder_name && self.read_title_txt {
            return Err(crate::domain::DomainError::Config(
                "upload.options: use_folder_name and read_title_txt are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub target_channels: Vec<String>,
    pub directory: Option<String>,
    #[serde(default = "default_caption_template")]
    pub caption_template: String,
    #[serde(default)]
    pub delay_between_uploads: f64,
    #[serde(default)]
    pub options: UploadOptions,
}

fn default_caption_template() -> String {
    "{filename}".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardChannelPair {
    pub source_channel: String,
    pub target_channels: Vec<String>,
    /// Per-pair keyword filter and text-replacement rules, plus an
    /// optional closing message. Empty/absent means no keyword filtering,
    /// matching every existing config unchanged.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Ordered `original -> replacement` tuples. A JSON array preserves
    /// declaration order; a `HashMap` would not.
    #[serde(default)]
    pub text_replacements: Vec<(String, String)>,
    pub final_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardConfig {
    #[serde(default)]
    pub forward_channel_pairs: Vec<ForwardChannelPair>,
    #[serde(default)]
    pub remove_captions: bool,
    #[serde(default)]
    pub media_types: Vec<String>,
    #[serde(default)]
    pub forward_delay: f64,
    #[serde(default)]
    pub start_id: i32,
    pub end_id: Option<i32>,
    #[serde(default = "default_tmp_path")]
    pub tmp_path: String,
}

fn default_tmp_path() -> String {
    "tmp/forward".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor_channel_pairs: Vec<ForwardChannelPair>,
    #[serde(default)]
    pub remove_captions: bool,
    #[serde(default)]
    pub media_types: Vec<String>,
    /// `YYYY-M-D-H`, or empty for unbounded.
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub forward_delay: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "GENERAL", default)]
    pub general: GeneralConfig,
    #[serde(rename = "DOWNLOAD", default)]
    pub download: DownloadConfig,
    #[serde(rename = "UPLOAD", default)]
    pub upload: UploadConfig,
    #[serde(rename = "FORWARD", default)]
    pub forward: ForwardConfig,
    #[serde(rename = "MONITOR", default)]
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Loads from `path` (JSON), then applies `TG_FWD_`-prefixed
    /// environment overrides, after loading a local `.env` if present.
    pub fn load(path: &std::path::Path) -> Result<Self, crate::domain::DomainError> {
        dotenv::dotenv().ok();
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("TG_FWD").separator("__"))
            .build()
            .map_err(|e| crate::domain::DomainError::Config(e.to_string()))?;
        let app: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| crate::domain::DomainError::Config(e.to_string()))?;
        app.upload.options.validate()?;
        Ok(app)
    }

    pub fn queue_capacity_or_default(&self) -> usize {
        4
    }

    pub fn base_delay_or_default(&self) -> std::time::Duration {
        std::time::Duration::from_millis(500)
    }

    pub fn inter_target_sleep_or_default(&self) -> std::time::Duration {
        std::time::Duration::from_millis(500)
    }
}
