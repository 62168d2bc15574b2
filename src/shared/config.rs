use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub const DEFAULT_JWT_SECRET: &str = "development-secret-key";

pub const DEFAULT_SYSTEM_PREFIX: &str = "You are a software developer called Ollie the dev. If you dont know something, you can search internet, read webpages, memorize info and recall things from memory";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OllieConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_browser_model")]
    pub browser_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_system_prefix")]
    pub system_prefix: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_browser_timeout")]
    pub browser_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub typesense_url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_search_k")]
    pub search_k: usize,
    #[serde(default = "default_memory_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_tool_output_chars")]
    pub max_tool_output_chars: usize,
}

/// Credentials are never read from the config file.
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
    pub typesense_api_key: Option<String>,
    pub jwt_secret: String,
}

impl Secrets {
    /// True when tokens would be signed with the well-known development key.
    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "<set>"))
            .field("google_cse_id", &self.google_cse_id)
            .field("typesense_api_key", &self.typesense_api_key.as_ref().map(|_| "<set>"))
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_port(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_url(),
            chat_model: default_chat_model(),
            browser_model: default_browser_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_iterations: default_max_iterations(),
            system_prefix: default_system_prefix(),
            request_timeout_secs: default_request_timeout(),
            browser_timeout_secs: default_browser_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            typesense_url: None,
            collection: default_collection(),
            search_k: default_search_k(),
            chunk_size: default_memory_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            max_tool_output_chars: default_max_tool_output_chars(),
        }
    }
}

impl OllieConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let mut config: OllieConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse config JSON at {}: {}", path.display(), e))?;
        config.normalize()?;
        Ok(config)
    }

    /// Loads the config file if one exists, otherwise starts from defaults.
    /// Environment overrides are applied on top in both cases.
    pub fn load_default() -> Result<(Self, Option<PathBuf>)> {
        let path = resolve_config_path();
        let (mut config, used) = if path.exists() {
            (Self::load_from_path(&path)?, Some(path))
        } else {
            (Self::default(), None)
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalize()?;
        Ok((config, used))
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = non_empty("OLLIECHAT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("OLLIECHAT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = non_empty("OLLIECHAT_LOG_DIR") {
            self.server.log_dir = dir;
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(url) = non_empty("KV_URL").or_else(|| non_empty("REDIS_URL")) {
            self.store.url = url;
        }
        if let Some(host) = non_empty("TYPESENSE_HOST") {
            self.memory.typesense_url = Some(typesense_url_from_host(&host));
        }

        self.secrets.openai_api_key = non_empty("OPENAI_API_KEY");
        self.secrets.google_api_key = non_empty("GOOGLE_API_KEY");
        self.secrets.google_cse_id = non_empty("GOOGLE_CSE_ID");
        self.secrets.typesense_api_key = non_empty("TYPESENSE_API_KEY");
        self.secrets.jwt_secret =
            non_empty("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string());
    }

    fn normalize(&mut self) -> Result<()> {
        self.model.base_url = self.model.base_url.trim().trim_end_matches('/').to_string();
        if self.model.base_url.is_empty() {
            self.model.base_url = default_model_url();
        }

        if self.model.system_prefix.trim().is_empty() {
            self.model.system_prefix = default_system_prefix();
        }

        if self.model.max_iterations == 0 {
            return Err(anyhow!("model.max_iterations must be at least 1"));
        }

        if self.memory.chunk_overlap >= self.memory.chunk_size {
            return Err(anyhow!(
                "memory.chunk_overlap ({}) must be smaller than memory.chunk_size ({})",
                self.memory.chunk_overlap,
                self.memory.chunk_size
            ));
        }

        if let Some(url) = self.memory.typesense_url.as_mut() {
            *url = url.trim().trim_end_matches('/').to_string();
        }

        Ok(())
    }
}

/// Typesense is reached over https on 443 when only a hostname is given.
fn typesense_url_from_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}:443", host.trim_end_matches('/'))
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_model_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}

fn default_browser_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_iterations() -> usize {
    15
}

fn default_system_prefix() -> String {
    DEFAULT_SYSTEM_PREFIX.to_string()
}

fn default_request_timeout() -> u64 {
    600
}

fn default_browser_timeout() -> u64 {
    300
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_collection() -> String {
    "personal_chat_memory".to_string()
}

fn default_search_k() -> usize {
    4
}

fn default_memory_chunk_size() -> usize {
    4000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_input_chars() -> usize {
    100_000
}

fn default_max_tool_output_chars() -> usize {
    12_000
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("OLLIECHAT_CONFIG_PATH") {
        return expand_path(path);
    }

    default_config_path()
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".olliechat")
        .join("olliechat.json")
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}
