//! Run configuration, persisted as TOML.
//!
//! Every field has a serde default so a partial (or absent) config file works.
//! CLI flags override the loaded values in `main.rs`.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or saving configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(marginalia::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(marginalia::config::parse),
        help("Check the TOML syntax. Unknown sections are ignored; known keys must have the right type.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(marginalia::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value for {field}: {message}")]
    #[diagnostic(code(marginalia::config::invalid))]
    Invalid { field: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarginaliaConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub book: BookConfig,
}

/// Remote text and image backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    /// Completion token limit. Tool output cut off here is recovered partially.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_text_model() -> String {
    "gpt-4-0125-preview".into()
}
fn default_image_model() -> String {
    "dall-e-3".into()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Worker pools, cache location, and illustration post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pool width used for both chapters and per-chapter requests.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Edge length of the square illustration, in pixels.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// Grey levels kept when compressing illustrations.
    #[serde(default = "default_image_levels")]
    pub image_levels: u8,
}

fn default_workers() -> usize {
    10
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("cache.redb")
}
fn default_image_size() -> u32 {
    768
}
fn default_image_levels() -> u8 {
    16
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cache_path: default_cache_path(),
            image_size: default_image_size(),
            image_levels: default_image_levels(),
        }
    }
}

/// Where things live inside an unpacked book. Paths below `content_dir` are
/// relative to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    #[serde(default = "default_text_dir")]
    pub text_dir: PathBuf,
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    #[serde(default = "default_css_path")]
    pub css_path: PathBuf,
    #[serde(default = "default_opf_path")]
    pub opf_path: PathBuf,
    #[serde(default = "default_ncx_path")]
    pub ncx_path: PathBuf,
    #[serde(default = "default_toc_path")]
    pub toc_path: PathBuf,
    /// File-name prefix selecting chapter documents in `text_dir`.
    #[serde(default = "default_chapter_prefix")]
    pub chapter_prefix: String,
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("epub")
}
fn default_text_dir() -> PathBuf {
    PathBuf::from("text")
}
fn default_images_dir() -> PathBuf {
    PathBuf::from("images")
}
fn default_css_path() -> PathBuf {
    PathBuf::from("css/local.css")
}
fn default_opf_path() -> PathBuf {
    PathBuf::from("content.opf")
}
fn default_ncx_path() -> PathBuf {
    PathBuf::from("toc.ncx")
}
fn default_toc_path() -> PathBuf {
    PathBuf::from("toc.xhtml")
}
fn default_chapter_prefix() -> String {
    "chapter-".into()
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            text_dir: default_text_dir(),
            images_dir: default_images_dir(),
            css_path: default_css_path(),
            opf_path: default_opf_path(),
            ncx_path: default_ncx_path(),
            toc_path: default_toc_path(),
            chapter_prefix: default_chapter_prefix(),
        }
    }
}

impl LayoutConfig {
    /// Absolute content root for a book unpacked into `work_dir`.
    pub fn content_root(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.content_dir)
    }
}

/// Per-book overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookConfig {
    /// Title used in prompts; read from the archive metadata when unset.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// XHTML file inserted as front matter after annotation.
    #[serde(default)]
    pub publisher_note: Option<PathBuf>,
}

impl MarginaliaConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            field: "<root>".into(),
            message: e.to_string(),
        })
    }

    /// Write as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, self.to_toml()?).map_err(write_err)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.workers".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.pipeline.image_size == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.image_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.pipeline.image_levels < 2 {
            return Err(ConfigError::Invalid {
                field: "pipeline.image_levels".into(),
                message: "need at least 2 grey levels".into(),
            });
        }
        if self.layout.chapter_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "layout.chapter_prefix".into(),
                message: "an empty prefix would treat every text file as a chapter".into(),
            });
        }
        Ok(())
    }
}
