use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::SelectionMode;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub retrieval: Option<RetrievalConfig>,
    pub output: Option<OutputConfig>,
    pub staging: Option<StagingConfig>,
    pub extraction: Option<ExtractionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub mirror_url: Option<String>,
    pub probe_timeout_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub label: Option<String>,
    pub mode: Option<SelectionMode>,
    pub identifier_key: Option<String>,
    pub auto_number_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    pub dir: Option<String>,
}

/// Page-text extraction tuning. Margins are fractions of the page height;
/// absent or `0.0` keeps running headers and footers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub header_margin: Option<f32>,
    pub footer_margin: Option<f32>,
}

/// Platform config directory path: `<config_dir>/scihubator/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scihubator").join("config.toml"))
}

/// Load config by cascading CWD `.scihubator.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".scihubator.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (base_r, over_r) = (base.retrieval.unwrap_or_default(), overlay.retrieval.unwrap_or_default());
    let (base_o, over_o) = (base.output.unwrap_or_default(), overlay.output.unwrap_or_default());
    let (base_s, over_s) = (base.staging.unwrap_or_default(), overlay.staging.unwrap_or_default());
    let (base_e, over_e) = (base.extraction.unwrap_or_default(), overlay.extraction.unwrap_or_default());

    ConfigFile {
        retrieval: Some(RetrievalConfig {
            mirror_url: over_r.mirror_url.or(base_r.mirror_url),
            probe_timeout_secs: over_r.probe_timeout_secs.or(base_r.probe_timeout_secs),
            fetch_timeout_secs: over_r.fetch_timeout_secs.or(base_r.fetch_timeout_secs),
            user_agent: over_r.user_agent.or(base_r.user_agent),
        }),
        output: Some(OutputConfig {
            label: over_o.label.or(base_o.label),
            mode: over_o.mode.or(base_o.mode),
            identifier_key: over_o.identifier_key.or(base_o.identifier_key),
            auto_number_key: over_o.auto_number_key.or(base_o.auto_number_key),
        }),
        staging: Some(StagingConfig {
            dir: over_s.dir.or(base_s.dir),
        }),
        extraction: Some(ExtractionConfig {
            header_margin: over_e.header_margin.or(base_e.header_margin),
            footer_margin: over_e.footer_margin.or(base_e.footer_margin),
        }),
    }
}
