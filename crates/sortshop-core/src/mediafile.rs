//! A media file together with the sidecars it owns.
//!
//! The media file and its sidecars form a ring of metadata sources; one of
//! them is active at a time. [`MediaFile::prepare`] is the once-per-session
//! pipeline that unifies dates, manages the standard sidecar, prunes
//! metadata and renames the file by date.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;

use crate::config::Config;
use crate::date::UNIFY_DATE_FIELDS;
use crate::error::{Error, Result};
use crate::exiftool::MetadataTool;
use crate::naming::{
    collision_dirs, file_name, find_free_name, split_first_dot, NameParts, DELETED_DIR,
    SIDECAR_EXTENSION,
};
use crate::sidecar::Sidecar;
use crate::source::{expect_single_update, MetadataSource, SourceFile};
use crate::taglist::Force;
use crate::tagsets::Tagsets;

/// Which source of the ring is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceRef {
    /// Nothing chosen since the last load
    #[default]
    Uninitialized,
    Media,
    Sidecar(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePosition {
    First,
    Last,
    Next,
    Previous,
    Current,
    /// File name of the media file or one of its sidecars
    Name(String),
}

impl FromStr for SourcePosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "first" => SourcePosition::First,
            "last" => SourcePosition::Last,
            "next" => SourcePosition::Next,
            "previous" => SourcePosition::Previous,
            "current" => SourcePosition::Current,
            "" => return Err(Error::Validation("empty source position".to_string())),
            name => SourcePosition::Name(name.to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    source: SourceFile,
    sidecars: Vec<Sidecar>,
    cursor: SourceRef,
    prepared: bool,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn tag_args<'a>(tags: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    tags.iter().map(|t| format!("-{}", t))
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_sidecars(path, Vec::new())
    }

    pub fn with_sidecars(path: impl Into<PathBuf>, sidecars: Vec<Sidecar>) -> Self {
        Self {
            source: SourceFile::new(path),
            sidecars,
            cursor: SourceRef::Uninitialized,
            prepared: false,
        }
    }

    pub fn add_sidecars(&mut self, sidecars: impl IntoIterator<Item = Sidecar>) {
        self.sidecars.extend(sidecars);
    }

    pub fn sidecars(&self) -> &[Sidecar] {
        &self.sidecars
    }

    /// Index of `<name>.xmp` among the sidecars.
    pub fn standard_sidecar_index(&self) -> Option<usize> {
        let name = self.name();
        self.sidecars.iter().position(|s| s.is_standard_for(name))
    }

    pub fn standard_sidecar(&self) -> Option<&Sidecar> {
        self.standard_sidecar_index().map(|i| &self.sidecars[i])
    }

    pub fn has_standard_sidecar(&self) -> bool {
        self.standard_sidecar_index().is_some()
    }

    /// Names of the source ring: the media file, then its sidecars.
    pub fn source_names(&self) -> Vec<&str> {
        std::iter::once(self.name())
            .chain(self.sidecars.iter().map(|s| s.name()))
            .collect()
    }

    pub fn cursor(&self) -> SourceRef {
        self.cursor
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn default_ref(&self, cfg: &Config) -> SourceRef {
        if cfg.metadata.use_sidecar && !self.sidecars.is_empty() {
            SourceRef::Sidecar(0)
        } else {
            SourceRef::Media
        }
    }

    fn active_ref(&self, cfg: &Config) -> SourceRef {
        match self.cursor {
            SourceRef::Uninitialized => self.default_ref(cfg),
            SourceRef::Sidecar(i) if i >= self.sidecars.len() => SourceRef::Media,
            other => other,
        }
    }

    fn source_at(&mut self, at: SourceRef) -> &mut SourceFile {
        match at {
            SourceRef::Sidecar(i) if i < self.sidecars.len() => self.sidecars[i].source_mut(),
            _ => &mut self.source,
        }
    }

    /// Active source without reloading anything.
    pub fn active_source(&self, cfg: &Config) -> &SourceFile {
        match self.active_ref(cfg) {
            SourceRef::Sidecar(i) => self.sidecars[i].source(),
            _ => &self.source,
        }
    }

    pub fn active_source_mut(&mut self, cfg: &Config) -> &mut SourceFile {
        let at = self.active_ref(cfg);
        self.source_at(at)
    }

    /// Where tags are kept: the standard sidecar when sidecars are in use,
    /// the media file otherwise.
    pub fn primary_source(&self, cfg: &Config) -> &SourceFile {
        match self.standard_sidecar_index() {
            Some(i) if cfg.metadata.use_sidecar => self.sidecars[i].source(),
            _ => &self.source,
        }
    }

    pub fn primary_source_mut(&mut self, cfg: &Config) -> &mut SourceFile {
        match self.standard_sidecar_index() {
            Some(i) if cfg.metadata.use_sidecar => self.sidecars[i].source_mut(),
            _ => &mut self.source,
        }
    }

    fn resolve(&self, position: &SourcePosition, cfg: &Config) -> SourceRef {
        let count = self.sidecars.len();
        let last = if count > 0 {
            SourceRef::Sidecar(count - 1)
        } else {
            SourceRef::Media
        };
        match position {
            SourcePosition::First => self.default_ref(cfg),
            SourcePosition::Last => last,
            SourcePosition::Current => self.active_ref(cfg),
            SourcePosition::Next => match self.active_ref(cfg) {
                SourceRef::Sidecar(i) if i + 1 < count => SourceRef::Sidecar(i + 1),
                SourceRef::Sidecar(_) => SourceRef::Media,
                _ if count > 0 => SourceRef::Sidecar(0),
                _ => SourceRef::Media,
            },
            SourcePosition::Previous => match self.active_ref(cfg) {
                SourceRef::Sidecar(0) => SourceRef::Media,
                SourceRef::Sidecar(i) => SourceRef::Sidecar(i - 1),
                _ => last,
            },
            SourcePosition::Name(name) => {
                match self.sidecars.iter().position(|s| s.name() == name) {
                    Some(i) => SourceRef::Sidecar(i),
                    None => {
                        if name != self.name() {
                            log::warn!("no source named \"{}\", using the media file", name);
                        }
                        SourceRef::Media
                    }
                }
            }
        }
    }

    fn evict_sidecar(&mut self, index: usize) -> Sidecar {
        let removed = self.sidecars.remove(index);
        self.cursor = match self.cursor {
            SourceRef::Sidecar(j) if j > index => SourceRef::Sidecar(j - 1),
            SourceRef::Sidecar(j) if j == index => SourceRef::Uninitialized,
            other => other,
        };
        removed
    }

    /// Move the source cursor and load the source it lands on.
    ///
    /// A vanished sidecar is dropped and reported as `NotFound`; asking again
    /// with the same position skips the gap. A vanished media file is an
    /// `Index` error: the whole item is gone.
    pub fn get_source(
        &mut self,
        position: SourcePosition,
        tool: &mut dyn MetadataTool,
        cfg: &Config,
    ) -> Result<&mut SourceFile> {
        let target = self.resolve(&position, cfg);
        match target {
            SourceRef::Sidecar(i) if !self.sidecars[i].exists() => {
                let removed = self.evict_sidecar(i);
                log::warn!("sidecar \"{}\" not found anymore", removed.path().display());
                return Err(Error::NotFound(removed.path().to_path_buf()));
            }
            SourceRef::Media if !self.source.exists() => {
                log::warn!("media file \"{}\" not found anymore", self.path().display());
                return Err(Error::Index(format!("{} is gone", self.name())));
            }
            _ => {}
        }

        if self.cursor != SourceRef::Uninitialized {
            let previous = self.active_ref(cfg);
            self.source_at(previous).unload();
        }
        self.source_at(target).load(tool, cfg)?;
        self.cursor = target;
        Ok(self.source_at(target))
    }

    /// Does the name match `Renaming.detect_scheme` filled in with the
    /// creation date?
    pub fn is_named_correctly(&self, cfg: &Config) -> Result<bool> {
        let date = self
            .source
            .creation_date()
            .ok_or_else(|| Error::Load(self.path().to_path_buf()))?;
        let scheme = cfg.detect_scheme()?;
        let mut pattern = String::new();
        write!(pattern, "{}", date.format(scheme)).map_err(|_| {
            log::error!("invalid Renaming.detect_scheme \"{}\"", scheme);
            Error::Config("Renaming.detect_scheme")
        })?;
        let re = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(re.is_match(self.name()))
    }

    fn soft_check(&self, cfg: &Config) -> Result<bool> {
        if cfg.renaming.rename_files && !self.is_named_correctly(cfg)? {
            return Ok(false);
        }
        Ok(!cfg.metadata.use_sidecar || self.has_standard_sidecar())
    }

    fn standard_sidecar_path(&self) -> PathBuf {
        let mut path = OsString::from(self.path().as_os_str());
        path.push(".");
        path.push(SIDECAR_EXTENSION);
        PathBuf::from(path)
    }

    fn unify_dates(&mut self, tool: &mut dyn MetadataTool) -> Result<()> {
        let date = UNIFY_DATE_FIELDS
            .iter()
            .find_map(|field| self.source.metadata_value(field))
            .ok_or_else(|| Error::Load(self.path().to_path_buf()))?
            .to_string();
        log::info!("unify dates of \"{}\" to {}", self.name(), date);

        let mut command = vec!["-overwrite_original".to_string()];
        command.extend(UNIFY_DATE_FIELDS.iter().map(|f| format!("-{}={}", f, date)));
        command.push(path_arg(self.path()));
        let response = tool.execute(&command)?;
        expect_single_update(&response, &command)?;
        self.source.patch_dates(&UNIFY_DATE_FIELDS, &date);
        Ok(())
    }

    fn create_standard_sidecar(&mut self, tool: &mut dyn MetadataTool, cfg: &Config) -> Result<()> {
        let mandatory = cfg.mandatory_metadata()?;
        let sidecar_path = self.standard_sidecar_path();
        log::info!("write sidecar \"{}\"", sidecar_path.display());

        let mut command = vec![
            "-overwrite_original".to_string(),
            "-tagsFromFile".to_string(),
            path_arg(self.path()),
        ];
        command.extend(tag_args(&mandatory));
        command.push(path_arg(&sidecar_path));
        let response = tool.execute(&command)?;
        if response.created + response.updated != 1 {
            log::error!("exiftool command \"{}\" failed", command.join(" "));
            return Err(Error::Write(command.join(" ")));
        }

        if !self.has_standard_sidecar() {
            self.sidecars.push(Sidecar::new(sidecar_path));
        }
        Ok(())
    }

    fn prune(&mut self, tool: &mut dyn MetadataTool, cfg: &Config) -> Result<()> {
        let remove = cfg.remove_metadata();
        if remove.is_empty() {
            log::warn!("pruning enabled but Metadata.remove_metadata is empty");
            return Ok(());
        }
        log::info!("prune metadata of \"{}\"", self.name());

        let mut command = vec!["-overwrite_original".to_string()];
        command.extend(remove.iter().map(|field| format!("-{}=", field)));
        command.push(path_arg(self.path()));
        let response = tool.execute(&command)?;
        expect_single_update(&response, &command)
    }

    /// Copy the mandatory tags back from the standard sidecar, then drop it.
    fn restore_from_sidecar(&mut self, tool: &mut dyn MetadataTool, cfg: &Config) -> Result<()> {
        let mandatory = cfg.mandatory_metadata()?;
        let index = self
            .standard_sidecar_index()
            .ok_or_else(|| Error::NotFound(self.standard_sidecar_path()))?;
        let sidecar_path = self.sidecars[index].path().to_path_buf();

        let mut command = vec![
            "-overwrite_original".to_string(),
            "-tagsFromFile".to_string(),
            path_arg(&sidecar_path),
        ];
        command.extend(tag_args(&mandatory));
        command.push(path_arg(self.path()));
        let response = tool.execute(&command)?;
        expect_single_update(&response, &command)?;

        fs::remove_file(&sidecar_path).map_err(|e| Error::from_io(e, &sidecar_path))?;
        self.evict_sidecar(index);
        log::info!("removed temporary sidecar \"{}\"", sidecar_path.display());
        Ok(())
    }

    /// Let the tool rename the file by date, then keep the name unique across
    /// the working directory and `deleted/` and re-pair the sidecars.
    pub fn rename_by_scheme(
        &mut self,
        tool: &mut dyn MetadataTool,
        cfg: &Config,
    ) -> Result<PathBuf> {
        let mut command: Vec<String> = cfg
            .rename_command()?
            .into_iter()
            .map(str::to_string)
            .collect();
        command.push(path_arg(self.path()));
        let response = tool.execute(&command)?;

        let new_name = response
            .new_name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                log::error!("no new name reported for \"{}\"", self.name());
                Error::NotFound(self.path().to_path_buf())
            })?;
        let mut new_path = PathBuf::from(new_name);
        if new_path.is_relative() {
            if let Some(parent) = self.path().parent() {
                new_path = parent.join(new_path);
            }
        }
        if !new_path.is_file() {
            log::error!("renamed file \"{}\" not found", new_path.display());
            return Err(Error::NotFound(new_path));
        }
        log::info!("renamed \"{}\" to \"{}\"", self.name(), file_name(&new_path));
        self.source.set_path(new_path.clone());

        // the tool only sees one directory
        let working_dir = cfg.working_dir()?;
        let deleted_dir = working_dir.join(DELETED_DIR);
        let other_side = if new_path.parent() == Some(deleted_dir.as_path()) {
            working_dir.to_path_buf()
        } else {
            deleted_dir
        };
        let name = file_name(&new_path).to_string();
        if other_side.join(&name).exists() {
            let width = cfg.renaming.counter_length;
            let (stem, suffix) = match NameParts::parse(&name) {
                Ok(parts) if parts.width() == width => (parts.stem, parts.suffix),
                _ => {
                    let (stem, suffix) = split_first_dot(&name);
                    (stem.to_string(), suffix.to_string())
                }
            };
            let free = find_free_name(
                &collision_dirs(working_dir),
                &stem,
                &suffix,
                width,
                Some(new_path.as_path()),
            )?;
            log::warn!("\"{}\" exists in both directories, using \"{}\"", name, free);
            new_path = self.source.rename(&free)?;
        }

        for sidecar in &mut self.sidecars {
            sidecar.rename_to_parent(&new_path, cfg)?;
        }
        Ok(new_path)
    }

    /// Run the prepare pipeline once per session.
    ///
    /// Never fails on an unloaded file, only logs.
    pub fn prepare(
        &mut self,
        tool: &mut dyn MetadataTool,
        cfg: &Config,
        tagsets: Option<&Tagsets>,
    ) -> Result<()> {
        if !self.source.is_loaded() {
            log::error!("cannot prepare \"{}\": not loaded", self.name());
            return Ok(());
        }
        if self.prepared {
            return Ok(());
        }
        if cfg.metadata.soft_check && self.soft_check(cfg)? {
            // name and sidecar only, dates and pruning are not verified
            log::warn!("\"{}\" looks prepared, skipping", self.name());
            self.prepared = true;
            return Ok(());
        }

        let use_sidecar = cfg.metadata.use_sidecar;
        let prune = cfg.metadata.prune_metadata;
        log::info!("prepare \"{}\"", self.name());

        self.unify_dates(tool)?;
        if use_sidecar || prune {
            self.create_standard_sidecar(tool, cfg)?;
        }
        if prune {
            self.prune(tool, cfg)?;
        }
        if prune && !use_sidecar {
            self.restore_from_sidecar(tool, cfg)?;
        }
        if cfg.renaming.rename_files && !self.is_named_correctly(cfg)? {
            self.rename_by_scheme(tool, cfg)?;
        }
        self.unload();
        self.load(tool, cfg)?;

        if cfg.metadata.apply_default_tagset {
            if let Some(tags) = tagsets.and_then(Tagsets::default_tagset) {
                let tags = tags.to_vec();
                self.primary_source_mut(cfg)
                    .toggle_tags(tool, &tags, None, Force::In)?;
            }
        }
        self.prepared = true;
        Ok(())
    }
}

impl MetadataSource for MediaFile {
    fn source(&self) -> &SourceFile {
        &self.source
    }

    fn source_mut(&mut self) -> &mut SourceFile {
        &mut self.source
    }

    /// Loads the sidecars too and resets the source cursor. Sidecars that
    /// vanished since the scan are dropped.
    fn load(&mut self, tool: &mut dyn MetadataTool, cfg: &Config) -> Result<()> {
        self.cursor = SourceRef::Uninitialized;
        self.source.load(tool, cfg)?;
        self.sidecars.retain(|sidecar| {
            let exists = sidecar.exists();
            if !exists {
                log::warn!("sidecar \"{}\" not found anymore", sidecar.path().display());
            }
            exists
        });
        for sidecar in &mut self.sidecars {
            sidecar.load(tool, cfg)?;
        }
        Ok(())
    }

    fn unload(&mut self) {
        self.source.unload();
        for sidecar in &mut self.sidecars {
            sidecar.unload();
        }
    }

    fn move_to(&mut self, target: &Path, cfg: &Config) -> Result<PathBuf> {
        let new_path = self.source.move_to(target)?;
        for sidecar in &mut self.sidecars {
            sidecar.rename_to_parent(&new_path, cfg)?;
        }
        Ok(new_path)
    }

    fn rename(&mut self, name: &str, cfg: &Config) -> Result<PathBuf> {
        let new_path = self.source.rename(name)?;
        for sidecar in &mut self.sidecars {
            sidecar.rename_to_parent(&new_path, cfg)?;
        }
        Ok(new_path)
    }

    /// Sidecars move first so a failure never leaves them behind a moved
    /// media file.
    fn toggle_deleted(&mut self, cfg: &Config) -> Result<PathBuf> {
        for sidecar in &mut self.sidecars {
            sidecar.toggle_deleted(cfg)?;
        }
        let new_path = self.source.toggle_deleted(cfg)?;
        for sidecar in &mut self.sidecars {
            sidecar.set_parent_path(new_path.clone());
        }
        Ok(new_path)
    }
}
