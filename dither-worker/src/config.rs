use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use toml_edit::{Array, DocumentMut, Item, value};

/// Default on-disk config filename
pub const DEFAULT_CONFIG_PATH: &str = "dither-worker.toml";

/// Written to disk when no config file exists yet.
const EXAMPLE_CONFIG: &str = include_str!("../../dither-worker.example.toml");

/// Strongly typed representation of the configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub server: Option<Server>,
    pub logging: Option<Logging>,
    pub engine: Option<Engine>,
    /// Named palettes; each entry is a CSS color string (`#0f380f`, `red`, `rgb(..)`).
    #[serde(default)]
    pub palettes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Server {
    pub bind_address: Option<String>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Engine {
    /// Number of independent engine instances.
    pub workers: Option<usize>,
    /// Pending requests per instance before submitters wait.
    pub queue_capacity: Option<usize>,
}

impl Config {
    pub fn workers(&self) -> usize {
        self.engine
            .as_ref()
            .and_then(|e| e.workers)
            .unwrap_or(2)
            .max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.engine
            .as_ref()
            .and_then(|e| e.queue_capacity)
            .unwrap_or(16)
            .max(1)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.server
            .as_ref()
            .and_then(|s| s.max_body_bytes)
            .unwrap_or(32 * 1024 * 1024)
    }

    pub fn bind_address(&self) -> Option<String> {
        self.server.as_ref().and_then(|s| s.bind_address.clone())
    }

    /// Resolve a named palette to RGB triples. `None` when the name is unknown or no
    /// entry parses; unparseable entries are skipped.
    pub fn palette(&self, name: &str) -> Option<Vec<[u8; 3]>> {
        let entries = self.palettes.get(name)?;
        let mut out = Vec::with_capacity(entries.len());
        for c in entries {
            match parse_color(c) {
                Some(rgb) => out.push(rgb),
                None => tracing::warn!(palette = %name, color = %c, "failed to parse palette entry"),
            }
        }
        if out.is_empty() { None } else { Some(out) }
    }
}

/// Parse a CSS color string into 8-bit RGB (alpha ignored).
pub fn parse_color(input: &str) -> Option<[u8; 3]> {
    let parsed = input.trim().parse::<css_color::Srgb>().ok()?;
    let r = (parsed.red * 255.0).round().clamp(0.0, 255.0) as u8;
    let g = (parsed.green * 255.0).round().clamp(0.0, 255.0) as u8;
    let b = (parsed.blue * 255.0).round().clamp(0.0, 255.0) as u8;
    tracing::trace!(input=%input, hex=format!("#{:02x}{:02x}{:02x}", r, g, b), "resolved palette color");
    Some([r, g, b])
}

/// Internal manager state kept behind an `Arc<RwLock<_>>`.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    doc: DocumentMut,
}

pub type SharedConfig = Arc<RwLock<ConfigManager>>;

impl ConfigManager {
    /// Load existing config file. If the file does not exist, creates it from the embedded example.
    pub async fn load(path: Option<PathBuf>) -> Result<SharedConfig> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !path.exists() {
            fs::write(&path, EXAMPLE_CONFIG)
                .await
                .with_context(|| format!("writing example config to {}", path.display()))?;
            // logging is not initialised yet at this point
            eprintln!("created default config file: {}", path.display());
        }

        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_text(path, &text)
    }

    /// Build a manager from TOML text without touching the disk until [`ConfigManager::save`].
    pub fn from_text(path: PathBuf, text: &str) -> Result<SharedConfig> {
        let doc = text
            .parse::<DocumentMut>()
            .with_context(|| format!("parsing config file {}", path.display()))?;
        // fail early on a document that does not match the typed schema
        toml_edit::de::from_document::<Config>(doc.clone())
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(Arc::new(RwLock::new(Self { path, doc })))
    }

    /// Convert current document to strongly typed struct.
    pub async fn to_struct(cfg: &SharedConfig) -> Result<Config> {
        let guard = cfg.read().await;
        let typed: Config = toml_edit::de::from_document(guard.doc.clone())?;
        Ok(typed)
    }

    /// Create or replace a named palette. Every color must parse.
    pub async fn set_palette(cfg: &SharedConfig, name: &str, colors: &[String]) -> Result<()> {
        if name.is_empty() {
            bail!("palette name must not be empty");
        }
        if colors.is_empty() {
            bail!("palette '{}' must contain at least one color", name);
        }
        if let Some(bad) = colors.iter().find(|c| parse_color(c).is_none()) {
            bail!("palette '{}' has unparseable color '{}'", name, bad);
        }
        let mut guard = cfg.write().await;
        let palettes = guard.doc["palettes"].or_insert(Item::Table(toml_edit::Table::new()));
        let Item::Table(tbl) = palettes else {
            bail!("palettes is not a table");
        };
        let mut arr = Array::new();
        for c in colors {
            arr.push(c.as_str());
        }
        tbl[name] = value(arr);
        Ok(())
    }

    /// Atomic write of current document to disk (best-effort durability via rename).
    pub async fn save(cfg: &SharedConfig) -> Result<()> {
        let (path, contents) = {
            let guard = cfg.read().await;
            (guard.path.clone(), guard.doc.to_string())
        };
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("writing tmp config {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming tmp config to {}", path.display()))?;
        Ok(())
    }
}
