//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$PREFETCH_CONFIG` environment variable
//! 2. `~/.config/prefetch/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use prefetch_store::{ArchiveSource, Registry};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub dataset: DatasetConfig,
    pub retriever: RetrieverConfig,
    pub registry: RegistryConfig,
    /// Extra or overriding archive entries, keyed by archive file name.
    pub archives: BTreeMap<String, ArchiveEntry>,
}

/// Where downloaded archives and caches live.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Default: platform-specific data dir.
    pub checkpoint_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub name: String,
    pub split: String,
    /// Local question file used when draining or measuring coverage.
    pub path: Option<String>,
    /// Member of `path` when it is a zip archive.
    pub member: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// bm25, dpr, ance, dkrr, spel, oracle or none.
    #[serde(rename = "type")]
    pub kind: String,
    /// Integer or "varying".
    #[serde(deserialize_with = "depth_text")]
    pub prefetched_k_size: String,
    pub retriever_top_k: usize,
    pub load_in_memory: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Prefix for the built-in share tokens.
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ArchiveEntry {
    pub url: Option<String>,
    pub path: Option<String>,
    pub sha256: Option<String>,
}

// --- Defaults ---

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "FACTOIDQA".into(),
            split: "train".into(),
            path: None,
            member: None,
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            kind: "bm25".into(),
            prefetched_k_size: "100".into(),
            retriever_top_k: 4,
            load_in_memory: false,
        }
    }
}

/// `prefetched_k_size` may be written as `100`, `"100"` or `"varying"`.
fn depth_text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Depth {
        Number(u64),
        Text(String),
    }
    Ok(match Depth::deserialize(d)? {
        Depth::Number(n) => n.to_string(),
        Depth::Text(s) => s,
    })
}

impl Config {
    /// Built-in registry with `[registry]` and `[archives]` applied.
    pub fn registry(&self) -> Result<Registry> {
        let mut registry = match &self.registry.base_url {
            Some(base) => Registry::builtin_with_base_url(base),
            None => Registry::builtin(),
        };
        for (name, entry) in &self.archives {
            let source = match (&entry.path, &entry.url) {
                (Some(path), None) => ArchiveSource::Local(PathBuf::from(path)),
                (None, Some(url)) => ArchiveSource::Remote {
                    url: url.clone(),
                    sha256: entry.sha256.clone(),
                },
                _ => bail!("archive entry {name} needs exactly one of `path` or `url`"),
            };
            registry.insert_archive(name.clone(), source);
        }
        Ok(registry)
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("PREFETCH_CONFIG") {
        return Some(PathBuf::from(p));
    }

    directories::BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("prefetch")
            .join("config.toml")
    })
}

/// Show the active config path (for `prefetch config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
