//! A single physical file metadata can be read from and written to: a media
//! file or one of its sidecars.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use crate::config::Config;
use crate::date::{parse_exiftool_date, CREATION_DATE_FIELDS};
use crate::error::{Error, Result};
use crate::exiftool::{MetadataTool, ToolResponse};
use crate::naming::{file_name, DELETED_DIR};
use crate::taglist::{Force, TagChanges, TagList, TagsetResolver};

/// Field tag writes go to.
pub const TAG_WRITE_FIELD: &str = "hierarchicalSubject";

/// Separator of list values in exiftool's text output.
const LIST_SEPARATOR: &str = ", ";

#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    metadata: BTreeMap<String, String>,
    tag_list: TagList,
    creation_date: Option<DateTime<FixedOffset>>,
    loaded: bool,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Fails unless the tool reports exactly one updated file.
pub(crate) fn expect_single_update(response: &ToolResponse, command: &[String]) -> Result<()> {
    if response.updated != 1 {
        log::error!("exiftool command \"{}\" failed", command.join(" "));
        return Err(Error::Write(command.join(" ")));
    }
    Ok(())
}

/// `Key : value` lines into a map.
fn parse_metadata(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: BTreeMap::new(),
            tag_list: TagList::new(),
            creation_date: None,
            loaded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        file_name(&self.path)
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn tag_list(&self) -> &TagList {
        &self.tag_list
    }

    pub fn creation_date(&self) -> Option<DateTime<FixedOffset>> {
        self.creation_date
    }

    /// -1 (rejected) to 5, 0 when unset.
    pub fn rating(&self) -> i8 {
        self.metadata_value("Rating")
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    /// EXIF orientation code, `'1'` when unset.
    pub fn orientation(&self) -> char {
        self.metadata_value("Orientation")
            .and_then(|o| o.chars().next())
            .unwrap_or('1')
    }

    /// The object can outlive a file deleted behind our back.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Is the file inside `<working_dir>/deleted`?
    pub fn is_deleted(&self, cfg: &Config) -> Result<bool> {
        let working_dir = cfg.working_dir()?;
        Ok(self.path.parent() == Some(working_dir.join(DELETED_DIR).as_path()))
    }

    fn ensure_exists(&self) -> Result<()> {
        if !self.exists() {
            log::error!("file \"{}\" not found", self.path.display());
            return Err(Error::NotFound(self.path.clone()));
        }
        Ok(())
    }

    /// Read all metadata, resolve the creation date and the tag list.
    pub fn load(&mut self, tool: &mut dyn MetadataTool, cfg: &Config) -> Result<()> {
        self.ensure_exists()?;
        let args = vec![path_arg(&self.path), "-n".to_string(), "-s".to_string()];
        let response = tool.execute(&args)?;
        let metadata = parse_metadata(&response.text);

        let creation_date = CREATION_DATE_FIELDS
            .iter()
            .filter_map(|field| metadata.get(*field).map(|v| (field, v)))
            .find_map(|(field, value)| {
                let date = parse_exiftool_date(value);
                if date.is_none() {
                    log::warn!("unparsable {} \"{}\" in {}", field, value, self.path.display());
                }
                date
            })
            .ok_or_else(|| {
                log::error!("no usable date in \"{}\"", self.path.display());
                Error::Load(self.path.clone())
            })?;

        let field = cfg.field_tags()?;
        let mut tag_list = TagList::new();
        if let Some(value) = metadata.get(field) {
            let tags: Vec<&str> = value.split(LIST_SEPARATOR).collect();
            tag_list.load_tags(&tags, false);
        }

        self.metadata = metadata;
        self.tag_list = tag_list;
        self.creation_date = Some(creation_date);
        self.loaded = true;
        Ok(())
    }

    pub fn unload(&mut self) {
        self.metadata.clear();
        self.tag_list = TagList::new();
        self.creation_date = None;
        self.loaded = false;
    }

    fn write_tag_changes(
        &mut self,
        tool: &mut dyn MetadataTool,
        changed: TagList,
        changes: &TagChanges,
    ) -> Result<()> {
        let mut command = vec!["-overwrite_original".to_string()];
        command.extend(changes.removed.iter().map(|t| format!("-{}-={}", TAG_WRITE_FIELD, t)));
        command.extend(changes.added.iter().map(|t| format!("-{}+={}", TAG_WRITE_FIELD, t)));
        command.push(path_arg(&self.path));

        let response = tool.execute(&command)?;
        expect_single_update(&response, &command)?;
        self.tag_list = changed;
        Ok(())
    }

    fn ensure_loaded(&self) -> Result<()> {
        if !self.loaded {
            return Err(Error::Validation(format!("\"{}\" is not loaded", self.name())));
        }
        Ok(())
    }

    /// Toggle tags and write the difference in one tool call.
    ///
    /// The in-memory tag list changes only once the write is confirmed.
    pub fn toggle_tags<S: AsRef<str>>(
        &mut self,
        tool: &mut dyn MetadataTool,
        tokens: &[S],
        resolver: Option<&dyn TagsetResolver>,
        force: Force,
    ) -> Result<TagChanges> {
        self.ensure_exists()?;
        self.ensure_loaded()?;
        let mut changed = self.tag_list.clone();
        let changes = changed.toggle(tokens, resolver, force);
        if changes.is_empty() {
            return Ok(changes);
        }
        self.write_tag_changes(tool, changed, &changes)?;
        Ok(changes)
    }

    /// All-or-nothing variant of [`SourceFile::toggle_tags`].
    pub fn toggle_tag_group<S: AsRef<str>>(
        &mut self,
        tool: &mut dyn MetadataTool,
        tokens: &[S],
        resolver: Option<&dyn TagsetResolver>,
    ) -> Result<TagChanges> {
        self.ensure_exists()?;
        self.ensure_loaded()?;
        let mut changed = self.tag_list.clone();
        let changes = changed.toggle_all(tokens, resolver);
        if changes.is_empty() {
            return Ok(changes);
        }
        self.write_tag_changes(tool, changed, &changes)?;
        Ok(changes)
    }

    /// Record dates already written to the file, without reloading.
    pub(crate) fn patch_dates(&mut self, fields: &[&str], value: &str) {
        for field in fields {
            self.metadata.insert(field.to_string(), value.to_string());
        }
        if let Some(date) = parse_exiftool_date(value) {
            self.creation_date = Some(date);
        }
    }

    /// Rating from -1 (rejected) to 5.
    pub fn set_rating(&mut self, tool: &mut dyn MetadataTool, rating: i8) -> Result<i8> {
        if !(-1..=5).contains(&rating) {
            log::error!("invalid rating \"{}\"", rating);
            return Err(Error::Validation(format!("rating {} not in -1..5", rating)));
        }
        self.ensure_exists()?;

        let command = vec![
            "-overwrite_original".to_string(),
            format!("-XMP:Rating={}", rating),
            path_arg(&self.path),
        ];
        let response = tool.execute(&command)?;
        expect_single_update(&response, &command)?;

        self.metadata.insert("Rating".to_string(), rating.to_string());
        Ok(rating)
    }

    /// EXIF orientation code `'1'` to `'8'`.
    pub fn set_orientation(
        &mut self,
        tool: &mut dyn MetadataTool,
        orientation: char,
    ) -> Result<char> {
        if !('1'..='8').contains(&orientation) {
            log::error!("invalid orientation \"{}\"", orientation);
            return Err(Error::Validation(format!(
                "orientation {} not in 1..8",
                orientation
            )));
        }
        self.ensure_exists()?;

        let command = vec![
            "-overwrite_original".to_string(),
            format!("-Orientation={}", orientation),
            "-n".to_string(),
            path_arg(&self.path),
        ];
        let response = tool.execute(&command)?;
        expect_single_update(&response, &command)?;

        self.metadata.insert("Orientation".to_string(), orientation.to_string());
        Ok(orientation)
    }

    /// Move the file and return the new path.
    ///
    /// A bare name renames within the current directory, an existing directory
    /// keeps the current name, anything else is the full destination.
    pub fn move_to(&mut self, target: &Path) -> Result<PathBuf> {
        log::debug!("moving file \"{}\"", self.name());
        let raw = target.to_string_lossy();
        if raw.is_empty() {
            log::error!("no target given");
            return Err(Error::Validation("empty move target".to_string()));
        }

        let destination = if !raw.contains('/') && !raw.contains('\\') {
            match self.path.parent() {
                Some(parent) => parent.join(target),
                None => target.to_path_buf(),
            }
        } else if target.is_dir() {
            target.join(self.name())
        } else {
            target.to_path_buf()
        };

        if destination.exists() {
            log::error!("file \"{}\" already exists", destination.display());
            return Err(Error::Exists(destination));
        }

        fs::rename(&self.path, &destination).map_err(|e| {
            log::error!(
                "cannot move \"{}\" to \"{}\": {}",
                self.path.display(),
                destination.display(),
                e
            );
            match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(self.path.clone()),
                _ => Error::from_io(e, &destination),
            }
        })?;
        self.path = destination.clone();
        Ok(destination)
    }

    /// Rename within the current directory.
    pub fn rename(&mut self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            log::error!("no name given");
            return Err(Error::Validation("empty name".to_string()));
        }
        if name.contains('/') || name.contains('\\') {
            log::error!("proposed name \"{}\" is a path", name);
            return Err(Error::Validation(format!("\"{}\" is a path, not a name", name)));
        }
        self.move_to(Path::new(name))
    }

    /// Move into `./deleted/` or back out of it.
    pub fn toggle_deleted(&mut self, cfg: &Config) -> Result<PathBuf> {
        let deleted = self.is_deleted(cfg)?;
        log::debug!("toggle deletion of {}", self.name());
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;

        let target = if deleted {
            parent
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::NotFound(parent.clone()))?
        } else {
            let deleted_dir = parent.join(DELETED_DIR);
            if !deleted_dir.exists() {
                fs::create_dir(&deleted_dir).map_err(|e| Error::from_io(e, &deleted_dir))?;
            }
            deleted_dir
        };
        self.move_to(&target)
    }
}

/// Common interface of media files and sidecars.
pub trait MetadataSource {
    fn source(&self) -> &SourceFile;

    fn source_mut(&mut self) -> &mut SourceFile;

    fn path(&self) -> &Path {
        self.source().path()
    }

    fn name(&self) -> &str {
        self.source().name()
    }

    fn exists(&self) -> bool {
        self.source().exists()
    }

    fn is_loaded(&self) -> bool {
        self.source().is_loaded()
    }

    fn is_deleted(&self, cfg: &Config) -> Result<bool> {
        self.source().is_deleted(cfg)
    }

    fn load(&mut self, tool: &mut dyn MetadataTool, cfg: &Config) -> Result<()> {
        self.source_mut().load(tool, cfg)
    }

    fn unload(&mut self) {
        self.source_mut().unload()
    }

    fn toggle_tags<S: AsRef<str>>(
        &mut self,
        tool: &mut dyn MetadataTool,
        tokens: &[S],
        resolver: Option<&dyn TagsetResolver>,
        force: Force,
    ) -> Result<TagChanges> {
        self.source_mut().toggle_tags(tool, tokens, resolver, force)
    }

    fn set_rating(&mut self, tool: &mut dyn MetadataTool, rating: i8) -> Result<i8> {
        self.source_mut().set_rating(tool, rating)
    }

    fn set_orientation(&mut self, tool: &mut dyn MetadataTool, orientation: char) -> Result<char> {
        self.source_mut().set_orientation(tool, orientation)
    }

    fn move_to(&mut self, target: &Path, _cfg: &Config) -> Result<PathBuf> {
        self.source_mut().move_to(target)
    }

    fn rename(&mut self, name: &str, _cfg: &Config) -> Result<PathBuf> {
        self.source_mut().rename(name)
    }

    fn toggle_deleted(&mut self, cfg: &Config) -> Result<PathBuf> {
        self.source_mut().toggle_deleted(cfg)
    }
}

impl MetadataSource for SourceFile {
    fn source(&self) -> &SourceFile {
        self
    }

    fn source_mut(&mut self) -> &mut SourceFile {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{touch, working_config, FakeTool};
    use tempfile::tempdir;

    #[test]
    fn load_reads_metadata_and_tags() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        tool.set(&path, "DateTimeOriginal", "2020:04:23 20:53:00");
        tool.set(&path, "HierarchicalSubject", "people|family, people, holiday");
        tool.set(&path, "Rating", "3");

        let mut source = SourceFile::new(&path);
        source.load(&mut tool, &cfg).unwrap();
        assert!(source.is_loaded());
        assert_eq!(source.rating(), 3);
        assert_eq!(source.orientation(), '1');
        assert_eq!(source.tag_list().to_vec(), vec!["holiday", "people", "people|family"]);
        // FileModifyDate comes first in the lookup order
        let expected = parse_exiftool_date(&tool.value(&path, "FileModifyDate").unwrap()).unwrap();
        assert_eq!(source.creation_date(), Some(expected));

        source.unload();
        assert!(!source.is_loaded());
        assert!(source.tag_list().is_empty());
        assert!(source.creation_date().is_none());
    }

    #[test]
    fn load_without_dates_fails() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        tool.clear(&path, "FileModifyDate");

        let mut source = SourceFile::new(&path);
        assert!(matches!(source.load(&mut tool, &cfg), Err(Error::Load(_))));
        assert!(!source.is_loaded());
    }

    #[test]
    fn load_requires_tag_field() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let mut cfg = working_config(dir.path());
        cfg.metadata.field_tags = None;
        let mut tool = FakeTool::new();
        let mut source = SourceFile::new(&path);
        assert!(matches!(source.load(&mut tool, &cfg), Err(Error::Config(_))));
        assert!(!source.is_loaded());
    }

    #[test]
    fn toggle_writes_one_command() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        tool.set(&path, "HierarchicalSubject", "a, a|b");
        let mut source = SourceFile::new(&path);
        source.load(&mut tool, &cfg).unwrap();

        let changes = source
            .toggle_tags(&mut tool, &["a|b", "c|d"], None, Force::Toggle)
            .unwrap();
        assert_eq!(changes.removed, vec!["a|b", "a"]);
        assert_eq!(changes.added, vec!["c|d", "c"]);

        let last = tool.last_call().unwrap();
        assert_eq!(
            last,
            &vec![
                "-overwrite_original".to_string(),
                "-hierarchicalSubject-=a|b".to_string(),
                "-hierarchicalSubject-=a".to_string(),
                "-hierarchicalSubject+=c|d".to_string(),
                "-hierarchicalSubject+=c".to_string(),
                path_arg(&path),
            ]
        );
        assert_eq!(source.tag_list().to_vec(), vec!["c", "c|d"]);
    }

    #[test]
    fn failed_write_keeps_cache() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        let mut source = SourceFile::new(&path);
        source.load(&mut tool, &cfg).unwrap();

        tool.fail_writes(true);
        let calls = tool.calls().len();
        assert!(matches!(
            source.toggle_tags(&mut tool, &["x"], None, Force::Toggle),
            Err(Error::Write(_))
        ));
        assert_eq!(tool.calls().len(), calls + 1);
        assert!(source.tag_list().is_empty());
        assert!(matches!(source.set_rating(&mut tool, 4), Err(Error::Write(_))));
        assert_eq!(source.rating(), 0);
    }

    #[test]
    fn nothing_to_toggle_is_a_noop() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        let mut source = SourceFile::new(&path);
        source.load(&mut tool, &cfg).unwrap();
        let calls = tool.calls().len();
        let changes = source
            .toggle_tags(&mut tool, &["absent"], None, Force::Out)
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(tool.calls().len(), calls);
    }

    #[test]
    fn vanished_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut tool = FakeTool::new();
        let mut source = SourceFile::new(&path);
        source.load(&mut tool, &cfg).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(!source.exists());
        assert!(matches!(
            source.toggle_tags(&mut tool, &["x"], None, Force::Toggle),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn rating_and_orientation_validate_first() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let mut tool = FakeTool::new();
        let mut source = SourceFile::new(&path);

        assert!(matches!(source.set_rating(&mut tool, 6), Err(Error::Validation(_))));
        assert!(matches!(source.set_rating(&mut tool, -2), Err(Error::Validation(_))));
        assert!(matches!(source.set_orientation(&mut tool, '9'), Err(Error::Validation(_))));
        assert!(tool.calls().is_empty());

        assert_eq!(source.set_rating(&mut tool, -1).unwrap(), -1);
        assert_eq!(source.rating(), -1);
        assert_eq!(source.set_orientation(&mut tool, '6').unwrap(), '6');
        assert_eq!(source.orientation(), '6');
        assert_eq!(tool.calls().len(), 2);
    }

    #[test]
    fn move_and_rename() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        touch(dir.path(), "taken.jpg");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let mut source = SourceFile::new(&path);

        assert!(matches!(source.rename(""), Err(Error::Validation(_))));
        assert!(matches!(source.rename("x/y.jpg"), Err(Error::Validation(_))));
        assert!(matches!(source.rename("taken.jpg"), Err(Error::Exists(_))));

        assert_eq!(source.rename("b.jpg").unwrap(), dir.path().join("b.jpg"));
        assert!(source.exists());
        assert_eq!(source.move_to(&sub).unwrap(), sub.join("b.jpg"));
        assert_eq!(source.name(), "b.jpg");
        assert!(!dir.path().join("b.jpg").exists());
    }

    #[test]
    fn toggle_deleted_round_trip() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");
        let cfg = working_config(dir.path());
        let mut source = SourceFile::new(&path);

        assert!(!source.is_deleted(&cfg).unwrap());
        let moved = source.toggle_deleted(&cfg).unwrap();
        assert_eq!(moved, dir.path().join(DELETED_DIR).join("a.jpg"));
        assert!(source.is_deleted(&cfg).unwrap());

        source.toggle_deleted(&cfg).unwrap();
        assert_eq!(source.path(), path.as_path());
        assert!(!source.is_deleted(&cfg).unwrap());

        assert!(matches!(source.is_deleted(&Config::default()), Err(Error::Config(_))));
    }
}
