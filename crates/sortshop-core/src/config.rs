//! Configuration surface consumed by the core.
//!
//! Stored as TOML with one table per section:
//!
//! ```toml
//! [Paths]
//! working_dir = "/home/me/photos/inbox"
//! path_tagsets = "~/.config/sortshop/tagsets"
//!
//! [Metadata]
//! use_sidecar = true
//! mandatory_metadata = "XMP:All"
//! field_tags = "HierarchicalSubject"
//!
//! [Renaming]
//! rename_files = true
//! rename_command = "-d IMG_%Y%m%d_%H%M%S%%-c.%%e -FileName<DateTimeOriginal"
//! detect_scheme = "IMG_%Y%m%d_%H%M%S.*"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_DIR: &str = "sortshop";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub paths: PathsConfig,
    pub metadata: MetadataConfig,
    pub renaming: RenamingConfig,
    pub sorting: SortingConfig,
    pub exif_tool: ExifToolConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub working_dir: Option<PathBuf>,
    /// Global tagsets file, `~` is expanded
    pub path_tagsets: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub use_sidecar: bool,
    /// Space separated tag names copied into a new sidecar
    pub mandatory_metadata: String,
    /// Space separated tag names stripped when pruning
    pub remove_metadata: String,
    pub prune_metadata: bool,
    pub soft_check: bool,
    pub field_tags: Option<String>,
    pub apply_default_tagset: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            use_sidecar: false,
            mandatory_metadata: String::new(),
            remove_metadata: String::new(),
            prune_metadata: false,
            soft_check: false,
            field_tags: Some("HierarchicalSubject".to_string()),
            apply_default_tagset: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenamingConfig {
    pub rename_files: bool,
    pub rename_command: String,
    /// strftime template, the formatted result is matched as a regex
    pub detect_scheme: String,
    pub counter_length: usize,
}

impl Default for RenamingConfig {
    fn default() -> Self {
        Self {
            rename_files: false,
            rename_command: String::new(),
            detect_scheme: String::new(),
            counter_length: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingConfig {
    pub sorting_tag_regex: String,
    pub sorting_tag_sub: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExifToolConfig {
    pub executable: PathBuf,
    /// Passed as `-config <file>` when set
    pub config: Option<PathBuf>,
}

impl Default for ExifToolConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("exiftool"),
            config: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Recognized media extensions without the dot, compared case-insensitively.
    /// Empty means "anything with an image MIME type".
    pub extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "cr2", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn split_words(value: &str) -> Vec<&str> {
    value.split_whitespace().collect()
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Config {
    /// Default location: `<config_dir>/sortshop/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from an explicit file, or from the default location if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.is_file() => p,
                _ => {
                    log::debug!("no config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let text = fs::read_to_string(&path).map_err(|e| Error::from_io(e, &path))?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn working_dir(&self) -> Result<&Path> {
        self.paths
            .working_dir
            .as_deref()
            .ok_or(Error::Config("Paths.working_dir"))
    }

    pub fn tagsets_path(&self) -> Option<PathBuf> {
        self.paths.path_tagsets.as_deref().map(expand_home)
    }

    pub fn field_tags(&self) -> Result<&str> {
        match self.metadata.field_tags.as_deref() {
            Some(field) if !field.trim().is_empty() => Ok(field.trim()),
            _ => {
                log::error!("configuration value Metadata.field_tags is not set");
                Err(Error::Config("Metadata.field_tags"))
            }
        }
    }

    pub fn mandatory_metadata(&self) -> Result<Vec<&str>> {
        let tags = split_words(&self.metadata.mandatory_metadata);
        if tags.is_empty() {
            log::error!("configuration value Metadata.mandatory_metadata is not set");
            return Err(Error::Config("Metadata.mandatory_metadata"));
        }
        Ok(tags)
    }

    pub fn remove_metadata(&self) -> Vec<&str> {
        split_words(&self.metadata.remove_metadata)
    }

    pub fn rename_command(&self) -> Result<Vec<&str>> {
        let tokens = split_words(&self.renaming.rename_command);
        if tokens.is_empty() {
            log::error!("configuration value Renaming.rename_command is not set");
            return Err(Error::Config("Renaming.rename_command"));
        }
        Ok(tokens)
    }

    pub fn detect_scheme(&self) -> Result<&str> {
        if self.renaming.detect_scheme.is_empty() {
            log::error!("configuration value Renaming.detect_scheme is not set");
            return Err(Error::Config("Renaming.detect_scheme"));
        }
        Ok(&self.renaming.detect_scheme)
    }

    /// `(regex, replacement)` used by the sort command.
    pub fn sorting_rule(&self) -> Result<(&str, &str)> {
        if self.sorting.sorting_tag_regex.is_empty() {
            log::error!("configuration value Sorting.sorting_tag_regex is not set");
            return Err(Error::Config("Sorting.sorting_tag_regex"));
        }
        if self.sorting.sorting_tag_sub.is_empty() {
            log::error!("configuration value Sorting.sorting_tag_sub is not set");
            return Err(Error::Config("Sorting.sorting_tag_sub"));
        }
        Ok((&self.sorting.sorting_tag_regex, &self.sorting.sorting_tag_sub))
    }

    /// Does the file name carry a recognized media extension?
    pub fn is_media_file(&self, path: &Path) -> bool {
        if self.media.extensions.is_empty() {
            return mime_guess::from_path(path)
                .first()
                .map_or(false, |mime| mime.type_() == mime_guess::mime::IMAGE);
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.media
            .extensions
            .iter()
            .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}
