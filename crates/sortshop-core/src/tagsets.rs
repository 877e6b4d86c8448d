//! Abbreviations for groups of tags.
//!
//! Plain UTF-8 text, one mapping per line:
//!
//! ```text
//! ABBR TAG1,TAG2|TAG3,TAG4
//! ```
//!
//! The first blank separates the abbreviation from its comma separated tags;
//! whitespace around tags is trimmed. Two files are kept apart by origin: a
//! local one at `<working_dir>/tagsets` and a global one at a configured path.
//! Lookups check local first, then global.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::taglist::TagsetResolver;

/// Abbreviation applied to every picture during prepare.
pub const DEFAULT_TAGSET: &str = "ALL_PICTURES";

pub const LOCAL_FILE_NAME: &str = "tagsets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Global,
}

impl FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Origin::Local),
            "global" => Ok(Origin::Global),
            other => Err(Error::Validation(format!("unknown tagset origin \"{}\"", other))),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Global => write!(f, "global"),
        }
    }
}

pub type TagsetMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct Tagsets {
    local: TagsetMap,
    global: TagsetMap,
    local_path: Option<PathBuf>,
    global_path: Option<PathBuf>,
}

impl Tagsets {
    pub fn new(local_path: Option<PathBuf>, global_path: Option<PathBuf>) -> Self {
        Self {
            local_path,
            global_path,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let local = cfg.working_dir().ok().map(|dir| dir.join(LOCAL_FILE_NAME));
        Self::new(local, cfg.tagsets_path())
    }

    pub fn path(&self, origin: Origin) -> Option<&Path> {
        match origin {
            Origin::Local => self.local_path.as_deref(),
            Origin::Global => self.global_path.as_deref(),
        }
    }

    pub fn tagsets(&self, origin: Origin) -> &TagsetMap {
        match origin {
            Origin::Local => &self.local,
            Origin::Global => &self.global,
        }
    }

    fn tagsets_mut(&mut self, origin: Origin) -> &mut TagsetMap {
        match origin {
            Origin::Local => &mut self.local,
            Origin::Global => &mut self.global,
        }
    }

    /// Replace the in-memory tagsets of one origin with the file contents.
    ///
    /// A missing file leaves that origin empty. Returns the number of entries.
    pub fn load(&mut self, origin: Origin) -> Result<usize> {
        let Some(path) = self.path(origin).map(Path::to_path_buf) else {
            self.tagsets_mut(origin).clear();
            return Ok(0);
        };
        let map = if path.is_dir() {
            log::info!("could not open file \"{}\"", path.display());
            TagsetMap::new()
        } else {
            match fs::read_to_string(&path) {
                Ok(text) => {
                    let map = parse(&text, &path);
                    log::info!("tagsets loaded from \"{}\"", path.display());
                    map
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::info!("could not open file \"{}\"", path.display());
                    TagsetMap::new()
                }
                Err(e) => return Err(Error::from_io(e, &path)),
            }
        };
        let count = map.len();
        *self.tagsets_mut(origin) = map;
        Ok(count)
    }

    pub fn load_all(&mut self) -> Result<()> {
        self.load(Origin::Global)?;
        self.load(Origin::Local)?;
        Ok(())
    }

    pub fn save(&self, origin: Origin) -> Result<()> {
        let path = self.path(origin).ok_or(match origin {
            Origin::Local => Error::Config("Paths.working_dir"),
            Origin::Global => Error::Config("Paths.path_tagsets"),
        })?;
        fs::write(path, render(self.tagsets(origin))).map_err(|e| Error::from_io(e, path))?;
        log::info!("tagsets saved to \"{}\"", path.display());
        Ok(())
    }

    /// Tags of an abbreviation, local origin first.
    pub fn get(&self, abbreviation: &str) -> Option<&[String]> {
        self.local
            .get(abbreviation)
            .or_else(|| self.global.get(abbreviation))
            .map(Vec::as_slice)
    }

    pub fn set<S: AsRef<str>>(
        &mut self,
        origin: Origin,
        abbreviation: &str,
        tags: &[S],
    ) -> Result<()> {
        let abbreviation = abbreviation.trim();
        if abbreviation.is_empty() || abbreviation.contains(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "invalid abbreviation \"{}\"",
                abbreviation
            )));
        }
        let tags: Vec<String> = tags
            .iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            return Err(Error::Validation(format!("no tags for \"{}\"", abbreviation)));
        }
        if tags.iter().any(|t| t.contains(',')) {
            return Err(Error::Validation("tags must not contain \",\"".to_string()));
        }
        self.tagsets_mut(origin).insert(abbreviation.to_string(), tags);
        Ok(())
    }

    pub fn remove(&mut self, origin: Origin, abbreviation: &str) -> Option<Vec<String>> {
        self.tagsets_mut(origin).remove(abbreviation)
    }

    pub fn default_tagset(&self) -> Option<&[String]> {
        self.get(DEFAULT_TAGSET)
    }

    pub fn has_default_tagset(&self) -> bool {
        self.default_tagset().is_some()
    }
}

impl TagsetResolver for Tagsets {
    fn resolve(&self, abbreviation: &str) -> Option<&[String]> {
        self.get(abbreviation)
    }
}

/// Parse tagsets text; invalid lines are logged and skipped.
pub fn parse(text: &str, source: &Path) -> TagsetMap {
    let mut map = TagsetMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((abbreviation, tags)) = line.split_once(' ') else {
            log::error!("Invalid line \"{}\" in file \"{}\"", line.trim_end(), source.display());
            continue;
        };
        if abbreviation.is_empty() {
            log::error!("Invalid line \"{}\" in file \"{}\"", line.trim_end(), source.display());
            continue;
        }
        let tags: Vec<String> = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            log::error!("No tags in line \"{}\" in file \"{}\"", line.trim_end(), source.display());
            continue;
        }
        log::debug!("loaded tagset: {} -> {}", abbreviation, tags.join(","));
        map.insert(abbreviation.to_string(), tags);
    }
    map
}

pub fn render(map: &TagsetMap) -> String {
    map.iter()
        .map(|(abbreviation, tags)| format!("{} {}\n", abbreviation, tags.join(",")))
        .collect()
}
