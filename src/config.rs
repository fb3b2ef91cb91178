//! Runtime Configuration
//!
//! [`BridgeConfig`] gathers everything the loader needs to find, compile and
//! bind a guest: where the default module lives, whether the streaming
//! compile path is attempted, the guest export names, and the headless
//! platform knobs. It can be built in code or read from a JSON file.

use crate::error::{RuntimeError, RuntimeResult};
use host_bridge::{ExportNames, HeadlessConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Configuration for one loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL sibling resources are resolved against
    pub base_url: Option<String>,
    /// Module name; the default source is `<module_name>_bg.wasm`
    pub module_name: String,
    /// Try the streaming compile path for response sources
    pub streaming: bool,
    /// Guest export names the bridge consumes
    pub exports: ExportNames,
    /// Headless platform settings
    pub platform: HeadlessConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            module_name: "guest".to_string(),
            streaming: true,
            exports: ExportNames::default(),
            platform: HeadlessConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Read a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::config(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| RuntimeError::config(format!("Invalid config {:?}: {}", path, e)))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_exports(mut self, exports: ExportNames) -> Self {
        self.exports = exports;
        self
    }

    pub fn with_platform(mut self, platform: HeadlessConfig) -> Self {
        self.platform = platform;
        self
    }

    /// URL of the sibling module resource, `<base_url>/<module_name>_bg.wasm`.
    ///
    /// Without a base URL the current directory is used.
    pub fn default_module_url(&self) -> RuntimeResult<Url> {
        let base = match &self.base_url {
            Some(base) => Url::parse(base)
                .map_err(|e| RuntimeError::config(format!("Invalid base URL {:?}: {}", base, e)))?,
            None => {
                let cwd = std::env::current_dir()?;
                Url::from_directory_path(&cwd)
                    .map_err(|()| RuntimeError::config(format!("{:?} is not an absolute directory", cwd)))?
            }
        };
        base.join(&format!("{}_bg.wasm", self.module_name))
            .map_err(|e| RuntimeError::config(format!("Cannot resolve module URL: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_module_url_is_a_sibling() {
        let config = BridgeConfig::default()
            .with_base_url("https://example.com/app/index.html")
            .with_module_name("game");
        let url = config.default_module_url().unwrap();
        assert_eq!(url.as_str(), "https://example.com/app/game_bg.wasm");
    }

    #[test]
    fn test_default_module_url_falls_back_to_cwd() {
        let url = BridgeConfig::default().default_module_url().unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/guest_bg.wasm"));
    }

    #[test]
    fn test_invalid_base_url() {
        let config = BridgeConfig::default().with_base_url("not a url");
        assert!(matches!(config.default_module_url(), Err(RuntimeError::Config { .. })));
    }

    #[test]
    fn test_from_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "module_name": "demo", "streaming": false, "platform": {{ "inner_width": 640 }} }}"#
        )
        .unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.module_name, "demo");
        assert!(!config.streaming);
        assert_eq!(config.platform.inner_width, 640.0);
        assert_eq!(config.platform.inner_height, 720.0);
        assert_eq!(config.exports, ExportNames::default());
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ module_name: ").unwrap();
        assert!(matches!(
            BridgeConfig::from_file(file.path()),
            Err(RuntimeError::Config { .. })
        ));
    }
}
