//! `.xmp` sidecar files and their pairing with a parent media file.
//!
//! A sidecar is named `parent.SUFFIX.xmp`, or `parent_COUNTER.SUFFIX.xmp`
//! when a program keeps more than one sidecar per image.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::naming::{collision_dirs, file_name, find_free_name, NameParts, SIDECAR_EXTENSION};
use crate::source::{MetadataSource, SourceFile};

#[derive(Debug, Clone)]
pub struct Sidecar {
    source: SourceFile,
    counter: Option<String>,
    parent_path: Option<PathBuf>,
}

impl Sidecar {
    /// Wrap a sidecar path and look for its parent on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut sidecar = Self {
            source: SourceFile::new(path),
            counter: None,
            parent_path: None,
        };
        sidecar.parent_path = sidecar.find_parent();
        sidecar
    }

    pub fn counter(&self) -> Option<&str> {
        self.counter.as_deref()
    }

    pub fn parent_path(&self) -> Option<&Path> {
        self.parent_path.as_deref()
    }

    pub(crate) fn set_parent_path(&mut self, parent: PathBuf) {
        self.parent_path = Some(parent);
    }

    pub fn is_orphan(&self) -> bool {
        self.parent_path.is_none()
    }

    /// Is this `<parent name>.xmp`?
    pub fn is_standard_for(&self, parent_name: &str) -> bool {
        self.name()
            .rsplit_once('.')
            .map_or(false, |(rest, ext)| {
                ext.eq_ignore_ascii_case(SIDECAR_EXTENSION) && rest == parent_name
            })
    }

    fn find_parent(&mut self) -> Option<PathBuf> {
        let path = self.source.path();
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        // "photo_07.jpg.xmp" -> "photo_07.jpg"
        let proposed = path.file_stem()?.to_str()?;

        let standard = dir.join(proposed);
        if standard.is_file() {
            return Some(standard);
        }

        let proposed = Path::new(proposed);
        let stem = proposed.file_stem()?.to_str()?;
        let index = stem.rfind('_')?;
        if index < 1 {
            return None;
        }
        let parent_name = match proposed.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", &stem[..index], ext),
            None => stem[..index].to_string(),
        };
        let parent = dir.join(parent_name);
        if !parent.is_file() {
            return None;
        }
        self.counter = Some(stem[index + 1..].to_string());
        Some(parent)
    }

    /// Rename to match a renamed or moved parent.
    ///
    /// Without a counter the new name is `<parent name>.xmp`. With one, the
    /// lowest free counter of the same width is used, checked against the
    /// working directory, its `deleted` subdirectory and the parent's
    /// directory.
    pub fn rename_to_parent(&mut self, new_parent: &Path, cfg: &Config) -> Result<PathBuf> {
        if new_parent.as_os_str().is_empty() {
            log::error!("no parent given for sidecar \"{}\"", self.name());
            return Err(Error::Validation("empty parent path".to_string()));
        }
        if !new_parent.exists() {
            log::error!("parent \"{}\" not found", new_parent.display());
            return Err(Error::NotFound(new_parent.to_path_buf()));
        }
        let dir = new_parent.parent().unwrap_or_else(|| Path::new(""));

        let (target, counter) = match &self.counter {
            None => (
                dir.join(format!("{}.{}", file_name(new_parent), SIDECAR_EXTENSION)),
                None,
            ),
            Some(counter) => {
                let stem = new_parent
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                let suffix = match new_parent.extension().and_then(|e| e.to_str()) {
                    Some(ext) => format!(".{}.{}", ext, SIDECAR_EXTENSION),
                    None => format!(".{}", SIDECAR_EXTENSION),
                };
                let mut dirs = collision_dirs(cfg.working_dir()?).to_vec();
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
                let name = find_free_name(
                    &dirs,
                    stem,
                    &suffix,
                    counter.len(),
                    Some(self.source.path()),
                )?;
                let counter = NameParts::parse(&name)?.counter;
                (dir.join(name), Some(counter))
            }
        };

        if target != self.source.path() {
            if target.exists() {
                log::error!("a file of that name already exists (\"{}\")", target.display());
                return Err(Error::Exists(target));
            }
            self.source.move_to(&target)?;
        }
        log::debug!("sidecar paired as \"{}\"", self.name());
        self.counter = counter;
        self.parent_path = Some(new_parent.to_path_buf());
        Ok(target)
    }
}

impl MetadataSource for Sidecar {
    fn source(&self) -> &SourceFile {
        &self.source
    }

    fn source_mut(&mut self) -> &mut SourceFile {
        &mut self.source
    }
}
