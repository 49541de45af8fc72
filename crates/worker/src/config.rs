use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use relay_cloud::S3Config;
use relay_comfyui::retry::RetryPolicy;
use relay_core::assets::{ProtectionPolicy, DEFAULT_DISPOSABLE_MARKER};
use relay_pipeline::RunnerSettings;

/// Error raised when an environment variable holds an unusable value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker configuration loaded from environment variables.
///
/// Every field has a default matching the standard ComfyUI worker image.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// ComfyUI `host:port` or base URL.
    pub comfy_host: String,
    pub output_path: PathBuf,
    pub comfy_root: PathBuf,
    pub polling_interval: Duration,
    pub polling_max_retries: u32,
    pub api_available_interval: Duration,
    pub api_available_max_retries: u32,
    /// Ordered candidate LoRA staging directories.
    pub lora_dirs: Vec<PathBuf>,
    pub disposable_marker: String,
    pub enable_flux: bool,
    pub refresh_worker: bool,
    /// `None` selects the in-memory state store.
    pub redis_url: Option<String>,
    /// `None` returns images inline.
    pub bucket: Option<S3Config>,
    pub job_deadline: Option<Duration>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                                              |
    /// |-----------------------------------|------------------------------------------------------|
    /// | `HOST`                            | `0.0.0.0`                                            |
    /// | `PORT`                            | `8000`                                               |
    /// | `COMFY_HOST`                      | `127.0.0.1:8188`                                     |
    /// | `COMFY_OUTPUT_PATH`               | `/comfyui/output`                                    |
    /// | `COMFY_ROOT`                      | `/comfyui`                                           |
    /// | `COMFY_POLLING_INTERVAL_MS`       | `250`                                                |
    /// | `COMFY_POLLING_MAX_RETRIES`       | `500`                                                |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `50`                                                 |
    /// | `COMFY_API_AVAILABLE_MAX_RETRIES` | `500`                                                |
    /// | `LORA_DIRS`                       | `/comfyui/models/loras,/runpod-volume/models/loras`  |
    /// | `LORA_DISPOSABLE_MARKER`          | `pytorch_lora_weights`                               |
    /// | `ENABLE_FLUX`                     | `false`                                              |
    /// | `REFRESH_WORKER`                  | `false`                                              |
    /// | `REDIS_URL`                       | unset (in-memory store)                              |
    /// | `BUCKET_*`                        | unset (inline base64), see [`S3Config::from_env`]    |
    /// | `JOB_DEADLINE_SECS`               | unset (no deadline)                                  |
    /// | `LOG_FORMAT`                      | `pretty` (`json` for structured output)              |
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|var| std::env::var(var).ok())?;
        config.bucket = S3Config::from_env();
        Ok(config)
    }

    /// Build from an arbitrary variable source. `BUCKET_*` is not read here.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let lora_dirs = get(
            "LORA_DIRS",
            "/comfyui/models/loras,/runpod-volume/models/loras",
        )
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect();

        let log_format = match get("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "" => LogFormat::Pretty,
            other => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let job_deadline = match lookup("JOB_DEADLINE_SECS").filter(|v| !v.trim().is_empty()) {
            Some(value) => Some(Duration::from_secs(parse_value("JOB_DEADLINE_SECS", &value)?)),
            None => None,
        };

        Ok(Self {
            host: get("HOST", "0.0.0.0"),
            port: parse_value("PORT", &get("PORT", "8000"))?,
            comfy_host: get("COMFY_HOST", "127.0.0.1:8188"),
            output_path: PathBuf::from(get("COMFY_OUTPUT_PATH", "/comfyui/output")),
            comfy_root: PathBuf::from(get("COMFY_ROOT", "/comfyui")),
            polling_interval: Duration::from_millis(parse_value(
                "COMFY_POLLING_INTERVAL_MS",
                &get("COMFY_POLLING_INTERVAL_MS", "250"),
            )?),
            polling_max_retries: parse_value(
                "COMFY_POLLING_MAX_RETRIES",
                &get("COMFY_POLLING_MAX_RETRIES", "500"),
            )?,
            api_available_interval: Duration::from_millis(parse_value(
                "COMFY_API_AVAILABLE_INTERVAL_MS",
                &get("COMFY_API_AVAILABLE_INTERVAL_MS", "50"),
            )?),
            api_available_max_retries: parse_value(
                "COMFY_API_AVAILABLE_MAX_RETRIES",
                &get("COMFY_API_AVAILABLE_MAX_RETRIES", "500"),
            )?,
            lora_dirs,
            disposable_marker: get("LORA_DISPOSABLE_MARKER", DEFAULT_DISPOSABLE_MARKER),
            enable_flux: parse_flag("ENABLE_FLUX", &get("ENABLE_FLUX", "false"))?,
            refresh_worker: parse_flag("REFRESH_WORKER", &get("REFRESH_WORKER", "false"))?,
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            bucket: None,
            job_deadline,
            log_format,
        })
    }

    /// Base URL of the ComfyUI HTTP API.
    pub fn comfy_url(&self) -> String {
        if self.comfy_host.starts_with("http://") || self.comfy_host.starts_with("https://") {
            self.comfy_host.clone()
        } else {
            format!("http://{}", self.comfy_host)
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            probe: RetryPolicy::fixed(self.api_available_max_retries, self.api_available_interval),
            poll: RetryPolicy::fixed(self.polling_max_retries, self.polling_interval),
            output_root: self.output_path.clone(),
            comfy_root: self.comfy_root.clone(),
            staging_dirs: self.lora_dirs.clone(),
            protection: ProtectionPolicy::new(self.disposable_marker.clone()),
            enable_flux: self.enable_flux,
            refresh_worker: self.refresh_worker,
            job_deadline: self.job_deadline,
        }
    }
}

fn parse_value<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.comfy_url(), "http://127.0.0.1:8188");
        assert_eq!(config.polling_interval, Duration::from_millis(250));
        assert_eq!(config.polling_max_retries, 500);
        assert_eq!(config.api_available_interval, Duration::from_millis(50));
        assert_eq!(config.lora_dirs.len(), 2);
        assert_eq!(config.disposable_marker, "pytorch_lora_weights");
        assert!(!config.enable_flux);
        assert!(config.redis_url.is_none());
        assert!(config.job_deadline.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("COMFY_HOST", "http://comfy:8188"),
            ("COMFY_POLLING_MAX_RETRIES", "100"),
            ("LORA_DIRS", "/a, /b ,"),
            ("ENABLE_FLUX", "TRUE"),
            ("REFRESH_WORKER", "1"),
            ("JOB_DEADLINE_SECS", "600"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.comfy_url(), "http://comfy:8188");
        assert_eq!(config.polling_max_retries, 100);
        assert_eq!(config.lora_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(config.enable_flux);
        assert!(config.refresh_worker);
        assert_eq!(config.job_deadline, Some(Duration::from_secs(600)));
        assert_eq!(config.log_format, LogFormat::Json);

        let settings = config.runner_settings();
        assert_eq!(settings.poll.max_attempts, 100);
        assert!(settings.enable_flux);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("COMFY_POLLING_INTERVAL_MS", "fast")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for COMFY_POLLING_INTERVAL_MS: \"fast\""
        );
        assert!(load(&[("PORT", "70000")]).is_err());
        assert!(load(&[("ENABLE_FLUX", "maybe")]).is_err());
    }
}
