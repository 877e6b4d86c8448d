//! Filename arithmetic shared by media files and sidecars.
//!
//! Names are read as `<stem>_<counter><suffix>` where the suffix starts at the
//! first dot: `mediafile_001_01.jpg.xmp` has stem `mediafile_001`, counter
//! `01` and suffix `.jpg.xmp`.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the soft-delete holding directory under the working directory.
pub const DELETED_DIR: &str = "deleted";

pub const SIDECAR_EXTENSION: &str = "xmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    /// Everything before the last `_`
    pub stem: String,
    pub counter: String,
    pub suffix: String,
}

impl NameParts {
    pub fn parse(name: &str) -> Result<Self> {
        let underscore = name
            .rfind('_')
            .ok_or_else(|| Error::Validation(format!("no counter in \"{}\"", name)))?;
        let dot = name
            .find('.')
            .ok_or_else(|| Error::Validation(format!("no suffix in \"{}\"", name)))?;
        if dot <= underscore + 1 {
            return Err(Error::Validation(format!("no counter in \"{}\"", name)));
        }
        let counter = &name[underscore + 1..dot];
        if !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Validation(format!("no counter in \"{}\"", name)));
        }
        Ok(Self {
            stem: name[..underscore].to_string(),
            counter: counter.to_string(),
            suffix: name[dot..].to_string(),
        })
    }

    pub fn width(&self) -> usize {
        self.counter.len()
    }

    /// Same name with the counter replaced, keeping its width.
    pub fn with_counter(&self, counter: u64) -> Result<String> {
        format_counter(&self.stem, counter, self.width(), &self.suffix)
    }
}

fn format_counter(stem: &str, counter: u64, width: usize, suffix: &str) -> Result<String> {
    let limit = 10u64.checked_pow(width as u32).unwrap_or(u64::MAX);
    if width == 0 || counter >= limit {
        return Err(Error::CounterOverflow {
            stem: stem.to_string(),
            width,
        });
    }
    Ok(format!("{}_{:0width$}{}", stem, counter, suffix, width = width))
}

/// Directories a generated name must be unique in.
pub fn collision_dirs(working_dir: &Path) -> [PathBuf; 2] {
    [working_dir.to_path_buf(), working_dir.join(DELETED_DIR)]
}

/// First `<stem>_<counter><suffix>` (counter counting up from 1, zero padded
/// to `width`) that exists in none of `dirs`. `own` is the file being renamed
/// and does not count as a collision.
pub fn find_free_name(
    dirs: &[PathBuf],
    stem: &str,
    suffix: &str,
    width: usize,
    own: Option<&Path>,
) -> Result<String> {
    let mut counter = 1;
    loop {
        let candidate = format_counter(stem, counter, width, suffix)?;
        let taken = dirs.iter().any(|dir| {
            let path = dir.join(&candidate);
            path.exists() && Some(path.as_path()) != own
        });
        if !taken {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Splits a name at its first dot: `a.tar.gz` → (`a`, `.tar.gz`).
pub fn split_first_dot(name: &str) -> (&str, &str) {
    match name.find('.') {
        Some(i) => (&name[..i], &name[i..]),
        None => (name, ""),
    }
}

/// File name of a path as UTF-8, empty if it has none.
pub fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn splits_name_parts() {
        let parts = NameParts::parse("mediafile_001_01.jpg.xmp").unwrap();
        assert_eq!(parts.stem, "mediafile_001");
        assert_eq!(parts.counter, "01");
        assert_eq!(parts.suffix, ".jpg.xmp");
        assert_eq!(parts.with_counter(7).unwrap(), "mediafile_001_07.jpg.xmp");
        assert!(matches!(
            parts.with_counter(100),
            Err(Error::CounterOverflow { width: 2, .. })
        ));
    }

    #[test]
    fn rejects_names_without_counter() {
        assert!(NameParts::parse("plain.jpg").is_err());
        assert!(NameParts::parse("stem_.jpg").is_err());
        assert!(NameParts::parse("stem_ab.jpg").is_err());
        assert!(NameParts::parse("no_suffix").is_err());
    }

    #[test]
    fn checks_both_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(DELETED_DIR)).unwrap();
        File::create(dir.path().join("img_01.jpg")).unwrap();
        File::create(dir.path().join(DELETED_DIR).join("img_02.jpg")).unwrap();

        let dirs = collision_dirs(dir.path());
        assert_eq!(find_free_name(&dirs, "img", ".jpg", 2, None).unwrap(), "img_03.jpg");
        assert_eq!(find_free_name(&dirs, "other", ".jpg", 3, None).unwrap(), "other_001.jpg");
        let own = dir.path().join("img_01.jpg");
        assert_eq!(
            find_free_name(&dirs, "img", ".jpg", 2, Some(own.as_path())).unwrap(),
            "img_01.jpg"
        );
    }

    #[test]
    fn probing_overflows() {
        let dir = tempdir().unwrap();
        for i in 1..10 {
            File::create(dir.path().join(format!("x_{}.jpg", i))).unwrap();
        }
        let dirs = collision_dirs(dir.path());
        assert!(matches!(
            find_free_name(&dirs, "x", ".jpg", 1, None),
            Err(Error::CounterOverflow { .. })
        ));
    }
}
