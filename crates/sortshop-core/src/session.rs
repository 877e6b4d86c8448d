//! Commands a front end issues against one working directory.
//!
//! A [`Session`] owns the configuration, the metadata tool, both tagset
//! origins and the scanned [`MediaList`]. The tool is released by
//! [`Session::close`], or when the session is dropped.

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exiftool::MetadataTool;
use crate::mediafile::{MediaFile, SourcePosition};
use crate::medialist::{MediaList, Position, ScanSummary};
use crate::progress::{CancellationToken, ProgressCallback, ThrottledProgress};
use crate::source::{MetadataSource, SourceFile};
use crate::taglist::{Force, TagChanges, HIERARCHY_DELIMITER};
use crate::tagsets::{Origin, Tagsets};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PrepareReport {
    pub total: u64,
    pub prepared: u64,
    pub failed: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortMove {
    pub name: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SortReport {
    pub moved: Vec<SortMove>,
    pub unmatched: Vec<String>,
    pub skipped_deleted: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

pub struct Session<T: MetadataTool> {
    config: Config,
    tool: T,
    tagsets: Tagsets,
    media: MediaList,
}

fn no_item() -> Error {
    Error::Index("no media file selected".to_string())
}

/// Relative subdirectory for a sort target, `|` separating levels.
fn sort_subdirectory(expanded: &str) -> Result<PathBuf> {
    let relative: PathBuf = expanded
        .split(HIERARCHY_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    let valid = !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(Error::Validation(format!(
            "\"{}\" is not a relative subdirectory",
            expanded
        )));
    }
    Ok(relative)
}

impl<T: MetadataTool> Session<T> {
    /// Load both tagset origins and scan the working directory.
    pub fn open(config: Config, tool: T) -> Result<Self> {
        let working_dir = config.working_dir()?.to_path_buf();
        let mut tagsets = Tagsets::from_config(&config);
        tagsets.load_all()?;
        let mut media = MediaList::new();
        media.parse(&working_dir, &config)?;
        Ok(Self {
            config,
            tool,
            tagsets,
            media,
        })
    }

    pub fn rescan(&mut self) -> Result<ScanSummary> {
        let working_dir = self.config.working_dir()?.to_path_buf();
        self.media.parse(&working_dir, &self.config)?;
        Ok(self.media.summary(&self.config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn tagsets(&self) -> &Tagsets {
        &self.tagsets
    }

    pub fn media_list(&self) -> &MediaList {
        &self.media
    }

    pub fn summary(&self) -> ScanSummary {
        self.media.summary(&self.config)
    }

    pub fn current(&self) -> Option<&MediaFile> {
        self.media.current()
    }

    /// Navigate the list, skipping files that vanished since the scan.
    pub fn show(&mut self, position: Position) -> Result<&mut MediaFile> {
        loop {
            match self.media.get_mediafile(position, &mut self.tool, &self.config) {
                Ok(_) => break,
                Err(e) if e.is_not_found() => log::warn!("{}, trying again", e),
                Err(e) => return Err(e),
            }
        }
        self.media.current_mut().ok_or_else(no_item)
    }

    /// Show a file by 1-based index or by name.
    pub fn jump(&mut self, target: &str) -> Result<&mut MediaFile> {
        let index = match target.trim().parse::<usize>() {
            Ok(0) => return Err(Error::Validation("indices start at 1".to_string())),
            Ok(index) => index,
            Err(_) => self.media.index_of(target.trim())?,
        };
        self.show(Position::Index(index - 1))
    }

    /// Move the source cursor of the current item.
    ///
    /// Vanished sidecars are skipped; if the media file itself is gone the
    /// list moves on to the next item.
    pub fn select_source(&mut self, position: SourcePosition) -> Result<&mut SourceFile> {
        let mut position = position;
        loop {
            let item = self.media.current_mut().ok_or_else(no_item)?;
            match item.get_source(position.clone(), &mut self.tool, &self.config) {
                Ok(_) => break,
                Err(e) if e.is_not_found() => log::warn!("{}, trying again", e),
                Err(Error::Index(message)) => {
                    log::warn!("{}, moving on", message);
                    self.show(Position::Next)?;
                    position = SourcePosition::First;
                }
                Err(e) => return Err(e),
            }
        }
        let item = self.media.current_mut().ok_or_else(no_item)?;
        Ok(item.active_source_mut(&self.config))
    }

    pub fn toggle_tags<S: AsRef<str>>(&mut self, tokens: &[S], force: Force) -> Result<TagChanges> {
        let item = self.media.current_mut().ok_or_else(no_item)?;
        item.active_source_mut(&self.config)
            .toggle_tags(&mut self.tool, tokens, Some(&self.tagsets), force)
    }

    /// All-or-nothing toggle of a tag group.
    pub fn toggle_tag_group<S: AsRef<str>>(&mut self, tokens: &[S]) -> Result<TagChanges> {
        let item = self.media.current_mut().ok_or_else(no_item)?;
        item.active_source_mut(&self.config)
            .toggle_tag_group(&mut self.tool, tokens, Some(&self.tagsets))
    }

    pub fn set_rating(&mut self, rating: i8) -> Result<i8> {
        let item = self.media.current_mut().ok_or_else(no_item)?;
        item.active_source_mut(&self.config)
            .set_rating(&mut self.tool, rating)
    }

    pub fn set_orientation(&mut self, orientation: char) -> Result<char> {
        let item = self.media.current_mut().ok_or_else(no_item)?;
        item.active_source_mut(&self.config)
            .set_orientation(&mut self.tool, orientation)
    }

    /// Move the current item, sidecars included, into `deleted/` or back.
    pub fn toggle_deleted(&mut self) -> Result<PathBuf> {
        let item = self.media.current_mut().ok_or_else(no_item)?;
        item.toggle_deleted(&self.config)
    }

    pub fn prepare_current(&mut self) -> Result<()> {
        let item = self.media.current_mut().ok_or_else(no_item)?;
        item.prepare(&mut self.tool, &self.config, Some(&self.tagsets))
    }

    /// Prepare every item in list order. Failures are collected per item;
    /// only cancellation aborts.
    pub fn prepare_all(
        &mut self,
        progress: Option<&ProgressCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<PrepareReport> {
        let progress = ThrottledProgress::new(progress);
        let total = self.media.len() as u64;
        let mut report = PrepareReport {
            total,
            ..PrepareReport::default()
        };

        for (index, item) in self.media.items_mut().iter_mut().enumerate() {
            if let Some(token) = cancel {
                token.check()?;
            }
            let name = item.name().to_string();
            progress.report("prepare", index as u64, total, &name);

            let was_loaded = item.is_loaded();
            let result = if item.exists() {
                prepare_item(item, &mut self.tool, &self.config, &self.tagsets)
            } else {
                Err(Error::NotFound(item.path().to_path_buf()))
            };
            match result {
                Ok(()) => report.prepared += 1,
                Err(e) => {
                    log::warn!("cannot prepare \"{}\": {}", name, e);
                    report.warnings.push(format!("{}: {}", name, e));
                    report.failed += 1;
                }
            }
            if !was_loaded {
                item.unload();
            }
        }
        log::info!("prepared {} of {} files", report.prepared, report.total);
        Ok(report)
    }

    /// Move every non-deleted item into the subdirectory its first matching
    /// tag names.
    pub fn sort(
        &mut self,
        progress: Option<&ProgressCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SortReport> {
        let (pattern, replacement) = self.config.sorting_rule()?;
        let re = Regex::new(pattern)?;
        let replacement = replacement.to_string();
        let working_dir = self.config.working_dir()?.to_path_buf();
        let progress = ThrottledProgress::new(progress);
        let total = self.media.len() as u64;
        let mut report = SortReport::default();
        let mut moved = vec![false; self.media.len()];

        for (index, item) in self.media.items_mut().iter_mut().enumerate() {
            if let Some(token) = cancel {
                token.check()?;
            }
            let name = item.name().to_string();
            progress.report("sort", index as u64, total, &name);

            match item.is_deleted(&self.config) {
                Ok(true) => {
                    report.skipped_deleted += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => return Err(e),
            }

            let was_loaded = item.is_loaded();
            let result = sort_item(
                item,
                &mut self.tool,
                &self.config,
                &re,
                &replacement,
                &working_dir,
            );
            if !was_loaded {
                item.unload();
            }
            match result {
                Ok(Some(destination)) => {
                    log::info!("sorted \"{}\" into \"{}\"", name, destination.display());
                    moved[index] = true;
                    report.moved.push(SortMove { name, destination });
                }
                Ok(None) => report.unmatched.push(name),
                Err(e) => {
                    log::warn!("cannot sort \"{}\": {}", name, e);
                    report.warnings.push(format!("{}: {}", name, e));
                }
            }
        }

        let mut flags = moved.into_iter();
        self.media.retain(|_| !flags.next().unwrap_or(false));
        Ok(report)
    }

    pub fn update_tagset<S: AsRef<str>>(
        &mut self,
        origin: Origin,
        abbreviation: &str,
        tags: &[S],
    ) -> Result<()> {
        self.tagsets.set(origin, abbreviation, tags)
    }

    pub fn remove_tagset(&mut self, origin: Origin, abbreviation: &str) -> Option<Vec<String>> {
        self.tagsets.remove(origin, abbreviation)
    }

    pub fn save_tagsets(&self, origin: Origin) -> Result<()> {
        self.tagsets.save(origin)
    }

    /// Shut the metadata tool down.
    pub fn close(mut self) -> Result<()> {
        self.tool.close()
    }
}

fn prepare_item(
    item: &mut MediaFile,
    tool: &mut dyn MetadataTool,
    cfg: &Config,
    tagsets: &Tagsets,
) -> Result<()> {
    if !item.is_loaded() {
        item.load(tool, cfg)?;
    }
    item.prepare(tool, cfg, Some(tagsets))
}

/// `Ok(None)` when no tag matches.
fn sort_item(
    item: &mut MediaFile,
    tool: &mut dyn MetadataTool,
    cfg: &Config,
    re: &Regex,
    replacement: &str,
    working_dir: &Path,
) -> Result<Option<PathBuf>> {
    if !item.exists() {
        return Err(Error::NotFound(item.path().to_path_buf()));
    }
    if !item.is_loaded() {
        item.load(tool, cfg)?;
    }
    let Some(expanded) = item
        .primary_source(cfg)
        .tag_list()
        .tags()
        .find(|tag| re.is_match(tag))
        .map(|tag| re.replace(tag, replacement).into_owned())
    else {
        return Ok(None);
    };

    let destination = working_dir.join(sort_subdirectory(&expanded)?);
    fs::create_dir_all(&destination).map_err(|e| Error::from_io(e, &destination))?;
    item.move_to(&destination, cfg)?;
    Ok(Some(destination))
}
