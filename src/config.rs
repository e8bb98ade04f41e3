//! Export configuration. Categories, position strategy and table layout can be loaded from a TOML file or taken
//! from one of the presets.
//!
//! ```toml
//! strategy = "bounds_centroid"
//! layout = "nested"
//! file_name = "breadcrumb-data.lua"
//!
//! [[categories]]
//! label = "mushrooms"
//! pattern = "shroom"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the file written inside the output directory.
pub const DEFAULT_FILE_NAME: &str = "breadcrumb-data.lua";

/// A named group of markers. An object belongs to it when its name contains `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Key of the category in the Lua table.
    pub label: String,
    /// Case sensitive, unanchored.
    pub pattern: String,
}

impl Category {
    pub fn new<L: Into<String>, P: Into<String>>(label: L, pattern: P) -> Self {
        Category {
            label: label.into(),
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        name.contains(&self.pattern[..])
    }
}

/// How the position of an object is computed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStrategy {
    /// Center of the local bounding box, moved to world space.
    BoundsCentroid,
    /// The object's `location`, as stored.
    Location,
}

/// How the positions of a category are written.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// `{ { x,y,z }, { x,y,z }, }`
    Nested,
    /// `{ x,y,z,x,y,z, }`
    Flat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown preset '{0}', expected 'centroid' or 'location'")]
    UnknownPreset(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Categories in output order.
    pub categories: Vec<Category>,
    pub strategy: PositionStrategy,
    pub layout: TableLayout,
    pub file_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig::bounds_centroid()
    }
}

impl ExportConfig {
    /// Mushrooms, crystals and drips at the world space center of their bounds, one table per point.
    pub fn bounds_centroid() -> Self {
        ExportConfig {
            categories: vec![
                Category::new("mushrooms", "shroom"),
                Category::new("crystals", "crystal"),
                Category::new("drips", "drip"),
            ],
            strategy: PositionStrategy::BoundsCentroid,
            layout: TableLayout::Nested,
            file_name: String::from(DEFAULT_FILE_NAME),
        }
    }

    /// Mushrooms and crystals at their raw location, coordinates flattened into one list per category.
    pub fn raw_location() -> Self {
        ExportConfig {
            categories: vec![
                Category::new("mushrooms", "shroom"),
                Category::new("crystals", "crystal"),
            ],
            strategy: PositionStrategy::Location,
            layout: TableLayout::Flat,
            file_name: String::from(DEFAULT_FILE_NAME),
        }
    }

    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "centroid" | "bounds_centroid" => Ok(ExportConfig::bounds_centroid()),
            "location" | "raw_location" => Ok(ExportConfig::raw_location()),
            _ => Err(ConfigError::UnknownPreset(name.to_owned())),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;

        ExportConfig::from_toml(&contents)
    }
}
