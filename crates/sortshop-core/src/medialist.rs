//! Ordered collection of the media files in the working directory and its
//! `deleted` subdirectory.
//!
//! Items are sorted by file name only, so moving a file into `deleted/` and
//! back never changes its position.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exiftool::MetadataTool;
use crate::mediafile::MediaFile;
use crate::naming::{file_name, DELETED_DIR, SIDECAR_EXTENSION};
use crate::sidecar::Sidecar;
use crate::source::MetadataSource;

/// Cursor movement within the list. `Index` is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    Last,
    Next,
    Previous,
    Current,
    Index(usize),
}

impl FromStr for Position {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" => Ok(Position::First),
            "last" => Ok(Position::Last),
            "next" => Ok(Position::Next),
            "previous" => Ok(Position::Previous),
            "current" => Ok(Position::Current),
            other => other
                .parse()
                .map(Position::Index)
                .map_err(|_| Error::Validation(format!("invalid position \"{}\"", other))),
        }
    }
}

/// What a scan found, for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub media_files: usize,
    pub sidecars: usize,
    pub deleted: usize,
    pub missing_parents: Vec<PathBuf>,
    pub no_access: Vec<PathBuf>,
    pub duplicate_name: Option<String>,
}

#[derive(Debug, Default)]
pub struct MediaList {
    items: Vec<MediaFile>,
    cursor: usize,
    missing_parents: Vec<PathBuf>,
    no_access: Vec<PathBuf>,
    duplicate_name: Option<String>,
}

/// Readable and writable, judged by the permission bits and a test open.
fn has_access(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if !meta.permissions().readonly() => File::open(path).is_ok(),
        _ => false,
    }
}

fn is_sidecar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(SIDECAR_EXTENSION))
}

impl MediaList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `directory` and `directory/deleted`.
    ///
    /// A name present on both sides aborts with `Exists`;
    /// [`MediaList::duplicate_name`] then tells which one.
    pub fn parse(&mut self, directory: &Path, cfg: &Config) -> Result<()> {
        if !directory.is_dir() {
            log::error!("no such directory \"{}\"", directory.display());
            return Err(Error::NotFound(directory.to_path_buf()));
        }
        *self = Self::default();

        let mut files = BTreeMap::new();
        self.scan_directory(directory, &mut files, cfg)?;
        let deleted = directory.join(DELETED_DIR);
        if deleted.is_dir() {
            self.scan_directory(&deleted, &mut files, cfg)?;
        }

        // keyed by file name, so already in display order
        self.items = files.into_values().collect();
        log::info!(
            "found {} media files, {} orphaned sidecars, {} without access",
            self.items.len(),
            self.missing_parents.len(),
            self.no_access.len()
        );
        Ok(())
    }

    fn scan_directory(
        &mut self,
        directory: &Path,
        files: &mut BTreeMap<String, MediaFile>,
        cfg: &Config,
    ) -> Result<()> {
        log::debug!("parse \"{}\"", directory.display());
        let mut entries = fs::read_dir(directory)
            .map_err(|e| Error::from_io(e, directory))?
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| Error::from_io(e, directory))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let name = file_name(&path).to_string();
            if name.is_empty() || name.starts_with('.') || !path.is_file() {
                continue;
            }
            let sidecar = is_sidecar_path(&path);
            if !sidecar && !cfg.is_media_file(&path) {
                continue;
            }
            if !has_access(&path) {
                log::warn!("insufficient permissions for \"{}\"", path.display());
                self.no_access.push(path);
                continue;
            }

            if sidecar {
                log::debug!("create sidecar \"{}\"", path.display());
                let sidecar = Sidecar::new(&path);
                let Some(parent) = sidecar.parent_path().map(Path::to_path_buf) else {
                    log::warn!("no parent for sidecar \"{}\"", path.display());
                    self.missing_parents.push(path);
                    continue;
                };
                let parent_name = file_name(&parent).to_string();
                match files.get_mut(&parent_name) {
                    Some(existing) => {
                        self.check_duplicate(existing, &parent)?;
                        existing.add_sidecars([sidecar]);
                    }
                    None if self.no_access.contains(&parent) || !has_access(&parent) => {
                        log::warn!(
                            "skipping sidecar \"{}\", its parent is not accessible",
                            path.display()
                        );
                    }
                    None => {
                        // the parent itself is skipped once the scan reaches it
                        files.insert(parent_name, MediaFile::with_sidecars(parent, vec![sidecar]));
                    }
                }
            } else {
                if let Some(existing) = files.get(&name) {
                    self.check_duplicate(existing, &path)?;
                    continue;
                }
                log::debug!("create mediafile \"{}\"", path.display());
                files.insert(name, MediaFile::new(path));
            }
        }
        Ok(())
    }

    fn check_duplicate(&mut self, existing: &MediaFile, path: &Path) -> Result<()> {
        if existing.path() != path {
            let name = file_name(path).to_string();
            log::error!(
                "file with same name at \"{}\" and \"{}\"",
                path.display(),
                existing.path().display()
            );
            self.duplicate_name = Some(name);
            return Err(Error::Exists(path.to_path_buf()));
        }
        Ok(())
    }

    pub fn items(&self) -> &[MediaFile] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [MediaFile] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn missing_parents(&self) -> &[PathBuf] {
        &self.missing_parents
    }

    pub fn no_access(&self) -> &[PathBuf] {
        &self.no_access
    }

    pub fn duplicate_name(&self) -> Option<&str> {
        self.duplicate_name.as_deref()
    }

    /// 0-based cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 1-based position of the current item, as shown to the user.
    pub fn current_index(&self) -> usize {
        self.cursor + 1
    }

    /// 1-based position of a file by name.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.items
            .iter()
            .position(|m| m.name() == name)
            .map(|i| i + 1)
            .ok_or_else(|| Error::NotFound(PathBuf::from(name)))
    }

    pub fn current(&self) -> Option<&MediaFile> {
        self.items.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut MediaFile> {
        self.items.get_mut(self.cursor)
    }

    /// Drop items, keeping the cursor in range.
    pub fn retain(&mut self, keep: impl FnMut(&MediaFile) -> bool) {
        self.items.retain(keep);
        self.cursor = self.cursor.min(self.items.len().saturating_sub(1));
    }

    pub fn summary(&self, cfg: &Config) -> ScanSummary {
        ScanSummary {
            media_files: self.items.len(),
            sidecars: self.items.iter().map(|m| m.sidecars().len()).sum(),
            deleted: self
                .items
                .iter()
                .filter(|m| m.is_deleted(cfg).unwrap_or(false))
                .count(),
            missing_parents: self.missing_parents.clone(),
            no_access: self.no_access.clone(),
            duplicate_name: self.duplicate_name.clone(),
        }
    }

    /// Move the cursor, unload the outgoing item and load the incoming one.
    ///
    /// An item whose file vanished is dropped and reported as `NotFound`;
    /// asking again with the same position skips the gap. An empty list is
    /// an `Index` error.
    pub fn get_mediafile(
        &mut self,
        position: Position,
        tool: &mut dyn MetadataTool,
        cfg: &Config,
    ) -> Result<&mut MediaFile> {
        if self.items.is_empty() {
            return Err(Error::Index("no media files".to_string()));
        }
        let last = self.items.len() - 1;
        let current = self.cursor.min(last);

        let index = match position {
            Position::Next if current >= last => 0,
            Position::Next => current + 1,
            // renaming shifts names ahead of the cursor, no wrapping back
            Position::Previous if current == 0 && cfg.renaming.rename_files => 0,
            Position::Previous if current == 0 => last,
            Position::Previous => current - 1,
            Position::First => 0,
            Position::Last => last,
            Position::Current => current,
            Position::Index(i) if i <= last => i,
            Position::Index(i) => {
                log::error!("invalid medialist index requested (\"{}\")", i + 1);
                current
            }
        };

        if !self.items[index].exists() {
            let removed = self.items.remove(index);
            log::warn!("\"{}\" not found anymore", removed.path().display());
            if index < self.cursor {
                self.cursor -= 1;
            }
            self.cursor = self.cursor.min(self.items.len().saturating_sub(1));
            return Err(Error::NotFound(removed.path().to_path_buf()));
        }

        self.items[current].unload();
        self.cursor = index;
        let item = &mut self.items[index];
        item.load(tool, cfg)?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{touch, working_config, FakeTool};
    use tempfile::tempdir;

    fn names(list: &MediaList) -> Vec<&str> {
        list.items().iter().map(|m| m.name()).collect()
    }

    #[test]
    fn scans_media_and_sidecars() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "b.jpg.xmp");
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), ".hidden.jpg");
        fs::create_dir(dir.path().join("sub.jpg")).unwrap();
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&list), vec!["a.jpg", "b.jpg"]);
        assert!(list.items()[0].sidecars().is_empty());
        assert_eq!(list.items()[1].sidecars().len(), 1);
        assert!(list.items()[1].has_standard_sidecar());
        assert_eq!(list.index_of("b.jpg").unwrap(), 2);
        assert!(list.index_of("c.jpg").is_err());
    }

    #[test]
    fn sidecars_share_one_entry() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Photo.jpg");
        touch(dir.path(), "Photo.jpg.xmp");
        touch(dir.path(), "Photo_01.jpg.xmp");
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.items()[0].sidecars().len(), 2);
        assert_eq!(list.summary(&cfg).sidecars, 2);
    }

    #[test]
    fn sidecar_registers_its_parent() {
        let dir = tempdir().unwrap();
        let parent = touch(dir.path(), "raw.heic");
        touch(dir.path(), "raw.heic.xmp");
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&list), vec!["raw.heic"]);
        assert_eq!(list.items()[0].path(), parent.as_path());
    }

    #[test]
    fn orphans_are_reported() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        let orphan = touch(dir.path(), "gone.jpg.xmp");
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&list), vec!["a.jpg"]);
        assert_eq!(list.missing_parents(), [orphan]);
    }

    #[test]
    fn duplicate_across_deleted_aborts() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "img.jpg");
        let deleted = dir.path().join(DELETED_DIR);
        fs::create_dir(&deleted).unwrap();
        touch(&deleted, "img.jpg");
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        assert!(matches!(list.parse(dir.path(), &cfg), Err(Error::Exists(_))));
        assert_eq!(list.duplicate_name(), Some("img.jpg"));
    }

    #[test]
    fn unwritable_files_are_excluded() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        let locked = touch(dir.path(), "b.jpg");
        let mut perms = fs::metadata(&locked).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&locked, perms).unwrap();
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&list), vec!["a.jpg"]);
        assert_eq!(list.no_access(), [locked]);
    }

    #[test]
    fn sidecar_of_unwritable_file_is_skipped() {
        let dir = tempdir().unwrap();
        let locked = touch(dir.path(), "b.jpg");
        touch(dir.path(), "b.jpg.xmp");
        let mut perms = fs::metadata(&locked).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&locked, perms).unwrap();
        let cfg = working_config(dir.path());

        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.no_access(), [locked]);
        assert!(list.missing_parents().is_empty());
    }

    #[test]
    fn missing_directory() {
        let dir = tempdir().unwrap();
        let cfg = working_config(dir.path());
        let mut list = MediaList::new();
        assert!(matches!(
            list.parse(&dir.path().join("nope"), &cfg),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn order_survives_delete_and_undelete() {
        let dir = tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            touch(dir.path(), name);
        }
        let cfg = working_config(dir.path());
        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        let before: Vec<String> = names(&list).iter().map(|n| n.to_string()).collect();

        list.items_mut()[1].toggle_deleted(&cfg).unwrap();
        let mut rescanned = MediaList::new();
        rescanned.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&rescanned), before);
        assert!(rescanned.items()[1].is_deleted(&cfg).unwrap());
        assert_eq!(rescanned.summary(&cfg).deleted, 1);

        rescanned.items_mut()[1].toggle_deleted(&cfg).unwrap();
        let mut again = MediaList::new();
        again.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&again), before);
        assert!(!again.items()[1].is_deleted(&cfg).unwrap());
    }

    #[test]
    fn cursor_navigation() {
        let dir = tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            touch(dir.path(), name);
        }
        let mut cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();

        let first = list.get_mediafile(Position::First, &mut tool, &cfg).unwrap();
        assert_eq!(first.name(), "a.jpg");
        assert!(first.is_loaded());
        list.get_mediafile(Position::Previous, &mut tool, &cfg).unwrap();
        assert_eq!(list.current_index(), 3);
        list.get_mediafile(Position::Next, &mut tool, &cfg).unwrap();
        assert_eq!(list.cursor(), 0);
        assert!(!list.items()[2].is_loaded());

        cfg.renaming.rename_files = true;
        list.get_mediafile(Position::Previous, &mut tool, &cfg).unwrap();
        assert_eq!(list.cursor(), 0);

        list.get_mediafile(Position::Index(2), &mut tool, &cfg).unwrap();
        assert_eq!(list.cursor(), 2);
        list.get_mediafile(Position::Index(7), &mut tool, &cfg).unwrap();
        assert_eq!(list.cursor(), 2);
    }

    #[test]
    fn stale_entries_are_evicted() {
        let dir = tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            touch(dir.path(), name);
        }
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        list.get_mediafile(Position::First, &mut tool, &cfg).unwrap();

        fs::remove_file(dir.path().join("b.jpg")).unwrap();
        assert!(matches!(
            list.get_mediafile(Position::Next, &mut tool, &cfg),
            Err(Error::NotFound(_))
        ));
        let next = list.get_mediafile(Position::Next, &mut tool, &cfg).unwrap();
        assert_eq!(next.name(), "c.jpg");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn empty_list_is_an_index_error() {
        let dir = tempdir().unwrap();
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert!(matches!(
            list.get_mediafile(Position::First, &mut tool, &cfg),
            Err(Error::Index(_))
        ));
    }

    #[test]
    fn walkthrough_of_two_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "b.jpg.xmp");
        let mut cfg = working_config(dir.path());
        cfg.metadata.use_sidecar = true;
        let mut tool = FakeTool::new();
        let mut list = MediaList::new();
        list.parse(dir.path(), &cfg).unwrap();
        assert_eq!(names(&list), vec!["a.jpg", "b.jpg"]);

        let b = list.get_mediafile(Position::Index(1), &mut tool, &cfg).unwrap();
        assert!(b.has_standard_sidecar());
        let source = b
            .get_source(crate::mediafile::SourcePosition::First, &mut tool, &cfg)
            .unwrap();
        assert_eq!(source.name(), "b.jpg.xmp");
        b.get_source(crate::mediafile::SourcePosition::Next, &mut tool, &cfg).unwrap();
        assert_eq!(b.cursor(), crate::mediafile::SourceRef::Media);
        b.get_source(crate::mediafile::SourcePosition::Next, &mut tool, &cfg).unwrap();
        assert_eq!(b.cursor(), crate::mediafile::SourceRef::Sidecar(0));
    }
}
