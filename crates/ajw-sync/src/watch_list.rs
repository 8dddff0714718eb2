//! `companies.yaml` loading: platform name -> list of targets, in file order.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ajw_adapters::{Target, TargetDescriptor};
use ajw_core::Platform;
use serde_yaml::Value as YamlValue;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} not found", path.display())]
    NotFound { path: PathBuf },
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{}: expected a mapping of platform name to targets", path.display())]
    NotAMapping { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    entries: Vec<(Platform, Vec<Target>)>,
}

impl WatchList {
    pub fn new(entries: Vec<(Platform, Vec<Target>)>) -> Self {
        Self { entries }
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.entries.iter().map(|(platform, _)| *platform)
    }

    /// Every (platform, target) pair, in configuration order.
    pub fn targets(&self) -> impl Iterator<Item = (Platform, &Target)> + '_ {
        self.entries
            .iter()
            .flat_map(|(platform, targets)| targets.iter().map(move |t| (*platform, t)))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, targets)| targets.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parsed document to watch list. Returns `None` when the top level is not a mapping.
    pub fn from_yaml_value(doc: YamlValue) -> Option<Self> {
        let mapping = match doc {
            YamlValue::Null => return Some(Self::default()),
            YamlValue::Mapping(mapping) => mapping,
            _ => return None,
        };

        let mut entries: Vec<(Platform, Vec<Target>)> = Vec::new();
        for (key, value) in mapping {
            let Some(name) = key.as_str() else {
                debug!(?key, "ignoring non-string watch list key");
                continue;
            };
            let Ok(platform) = Platform::from_str(name) else {
                debug!(key = name, "ignoring unsupported platform key");
                continue;
            };
            let targets = parse_targets(platform, value);
            match entries.iter_mut().find(|(p, _)| *p == platform) {
                Some((_, existing)) => existing.extend(targets),
                None => entries.push((platform, targets)),
            }
        }
        Some(Self { entries })
    }
}

fn parse_targets(platform: Platform, value: YamlValue) -> Vec<Target> {
    let items = match value {
        YamlValue::Null => return Vec::new(),
        YamlValue::Sequence(items) => items,
        _ => {
            warn!(%platform, "target list malformed; skipping");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            YamlValue::String(raw) => slug_target(&raw),
            YamlValue::Number(n) => slug_target(&n.to_string()),
            YamlValue::Mapping(_) => match serde_yaml::from_value::<TargetDescriptor>(item) {
                Ok(descriptor) => Some(Target::Descriptor(descriptor)),
                Err(err) => {
                    warn!(%platform, error = %err, "skipping malformed target entry");
                    None
                }
            },
            YamlValue::Null => None,
            other => {
                warn!(%platform, entry = ?other, "skipping unsupported target entry");
                None
            }
        })
        .collect()
}

/// Trimmed slug; blanks and `#`-prefixed entries are disabled targets.
fn slug_target(raw: &str) -> Option<Target> {
    let slug = raw.trim();
    if slug.is_empty() || slug.starts_with('#') {
        return None;
    }
    Some(Target::Slug(slug.to_string()))
}

pub fn parse_watch_list(text: &str, path: &Path) -> Result<WatchList, ConfigError> {
    let doc: YamlValue = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    WatchList::from_yaml_value(doc).ok_or_else(|| ConfigError::NotAMapping {
        path: path.to_path_buf(),
    })
}

pub async fn load_watch_list(path: &Path) -> Result<WatchList, ConfigError> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_watch_list(&text, path)
}
