//! Configuration for the dataroom.
//!
//! Layered with figment:
//! - Default values
//! - TOML configuration file (`.dataroom/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `DATAROOM_` and use double
//! underscores to separate nested levels:
//! - `DATAROOM_RETRIEVAL__MODE=cascaded` sets `retrieval.mode`
//! - `DATAROOM_EMBEDDING__MODEL=hashed` sets `embedding.model`
//! - `DATAROOM_STORAGE__PAGE_SIZE=500` sets `storage.page_size`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::documents::config::{ChunkingConfig, CollectionsConfig};
use crate::parsing::RetryPolicy;
use crate::parsing::local::INPUT_PLACEHOLDER;

/// Directory holding settings and the default index.
pub const CONFIG_DIR: &str = ".dataroom";
const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "DATAROOM_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root directory for all collections
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub collections: CollectionsConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `storage = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Text model name, or `"hashed"` for the offline generator
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Image model name, `"hashed"`, or `"none"`
    #[serde(default = "default_embedding_model")]
    pub image_model: String,

    /// Model cache directory. Defaults to the user cache dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub show_download_progress: bool,

    /// Inputs per model call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Width of the hashed generators
    #[serde(default = "default_hashed_dimension")]
    pub hashed_dimension: usize,
}

/// How documents are laid out across collections and retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// One stage over the paged and tabular collections.
    #[default]
    Parallel,
    /// Coarse units first, then fragments of the best units.
    Cascaded,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Cascaded => "cascaded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: RetrievalMode,

    /// Hits from the paged collection
    #[serde(default = "default_k")]
    pub paged_k: usize,

    /// Hits from the tabular collection
    #[serde(default = "default_k")]
    pub tabular_k: usize,

    /// Coarse units considered in the first stage
    #[serde(default = "default_unit_k")]
    pub unit_k: usize,

    /// Fragments returned by the second stage
    #[serde(default = "default_k")]
    pub fragment_k: usize,

    /// Number of top units the second stage is scoped to
    #[serde(default = "default_narrow_to")]
    pub narrow_to: usize,

    /// Second-stage query text when the question has no text
    #[serde(default = "default_image_fallback_text")]
    pub image_fallback_text: String,

    /// Joins context blocks
    #[serde(default = "default_separator")]
    pub separator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(flatten)]
    pub retry: RetryPolicy,

    /// External converters by extension. `{input}` is replaced by the file path.
    #[serde(default = "default_parser_commands")]
    pub commands: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Tantivy writer memory budget per collection
    #[serde(default = "default_writer_heap_bytes")]
    pub writer_heap_bytes: usize,

    /// Documents fetched per page when scanning a collection
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_embedding_model() -> String {
    "ClipVitB32".to_string()
}
fn default_batch_size() -> usize {
    crate::vector::DEFAULT_BATCH_SIZE
}
fn default_hashed_dimension() -> usize {
    512
}
fn default_k() -> usize {
    5
}
fn default_unit_k() -> usize {
    3
}
fn default_narrow_to() -> usize {
    1
}
fn default_image_fallback_text() -> String {
    "image analysis".to_string()
}
fn default_separator() -> String {
    "\n\n---\n\n".to_string()
}
fn default_parser_commands() -> BTreeMap<String, Vec<String>> {
    let mut commands = BTreeMap::new();
    commands.insert(
        "pdf".to_string(),
        vec![
            "pdftotext".to_string(),
            "-layout".to_string(),
            INPUT_PLACEHOLDER.to_string(),
            "-".to_string(),
        ],
    );
    commands
}
fn default_writer_heap_bytes() -> usize {
    50_000_000
}
fn default_page_size() -> usize {
    1000
}
fn default_generation_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            logging: LoggingConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            collections: CollectionsConfig::default(),
            retrieval: RetrievalConfig::default(),
            parser: ParserConfig::default(),
            storage: StorageConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            image_model: default_embedding_model(),
            cache_dir: None,
            show_download_progress: true,
            batch_size: default_batch_size(),
            hashed_dimension: default_hashed_dimension(),
        }
    }
}

impl EmbeddingConfig {
    /// Where model weights are cached.
    pub fn model_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR))
                .join("dataroom")
                .join("models")
        })
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            paged_k: default_k(),
            tabular_k: default_k(),
            unit_k: default_unit_k(),
            fragment_k: default_k(),
            narrow_to: default_narrow_to(),
            image_fallback_text: default_image_fallback_text(),
            separator: default_separator(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            commands: default_parser_commands(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            writer_heap_bytes: default_writer_heap_bytes(),
            page_size: default_page_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting levels; single underscores
            // stay part of the field name.
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.dataroom/settings.toml` from the current directory upward
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(SETTINGS_FILE));
            }
        }

        None
    }

    /// Directory containing `.dataroom`, if one exists above the current directory
    pub fn workspace_root() -> Option<PathBuf> {
        Self::find_workspace_config()?
            .parent()?
            .parent()
            .map(Path::to_path_buf)
    }

    /// Anchor a relative `index_path` at `root`
    pub fn resolve_index_path(&mut self, root: &Path) {
        if self.index_path.is_relative() {
            self.index_path = root.join(&self.index_path);
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file under `root/.dataroom`
    pub fn init_config_file(
        root: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.as_ref().join(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        self.chunking.validate()?;
        self.collections.validate()?;

        let ks = [
            ("retrieval.paged_k", self.retrieval.paged_k),
            ("retrieval.tabular_k", self.retrieval.tabular_k),
            ("retrieval.unit_k", self.retrieval.unit_k),
            ("retrieval.fragment_k", self.retrieval.fragment_k),
            ("retrieval.narrow_to", self.retrieval.narrow_to),
            ("embedding.batch_size", self.embedding.batch_size),
            ("storage.page_size", self.storage.page_size),
        ];
        for (name, value) in ks {
            if value == 0 {
                return Err(format!("{name} must be greater than 0"));
            }
        }

        if self.retrieval.narrow_to > self.retrieval.unit_k {
            return Err(format!(
                "retrieval.narrow_to ({}) cannot exceed retrieval.unit_k ({})",
                self.retrieval.narrow_to, self.retrieval.unit_k
            ));
        }
        if self.parser.retry.max_attempts == 0 {
            return Err("parser.max_attempts must be greater than 0".to_string());
        }
        // Tantivy rejects smaller writer budgets.
        if self.storage.writer_heap_bytes < 15_000_000 {
            return Err("storage.writer_heap_bytes must be at least 15000000".to_string());
        }
        Ok(())
    }
}
