//! Test helpers: file fixtures and a scripted stand-in for exiftool.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::date::{parse_exiftool_date, UNIFY_DATE_FIELDS};
use crate::error::Result;
use crate::exiftool::{MetadataTool, ToolResponse};

pub const DEFAULT_FILE_DATE: &str = "2021:01:02 03:04:05+00:00";

pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    File::create(&path).unwrap();
    path
}

/// Defaults with `Paths.working_dir` set.
pub fn working_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.working_dir = Some(dir.to_path_buf());
    cfg
}

type Metadata = BTreeMap<String, String>;

/// Answers reads from a per-path table and applies writes to it.
///
/// Every file starts out with a `FileModifyDate`, like on a real filesystem.
/// `-tagsFromFile` creates missing target files, `-FileName<` renames on disk.
#[derive(Debug, Default)]
pub struct FakeTool {
    files: HashMap<PathBuf, Metadata>,
    calls: Vec<Vec<String>>,
    fail_writes: bool,
}

fn default_metadata() -> Metadata {
    Metadata::from([("FileModifyDate".to_string(), DEFAULT_FILE_DATE.to_string())])
}

fn answer(text: String) -> Result<ToolResponse> {
    Ok(ToolResponse::parse(&text))
}

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, path: &Path) -> &mut Metadata {
        self.files.entry(path.to_path_buf()).or_insert_with(default_metadata)
    }

    pub fn set(&mut self, path: &Path, key: &str, value: &str) {
        self.entry(path).insert(key.to_string(), value.to_string());
    }

    pub fn clear(&mut self, path: &Path, key: &str) {
        self.entry(path).remove(key);
    }

    pub fn value(&self, path: &Path, key: &str) -> Option<String> {
        match self.files.get(path) {
            Some(metadata) => metadata.get(key).cloned(),
            None => default_metadata().remove(key),
        }
    }

    pub fn calls(&self) -> &[Vec<String>] {
        &self.calls
    }

    pub fn last_call(&self) -> Option<&Vec<String>> {
        self.calls.last()
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn read(&mut self, path: &Path) -> Result<ToolResponse> {
        if !path.is_file() {
            return answer(format!("Error: File not found - {}", path.display()));
        }
        let text = self
            .entry(path)
            .iter()
            .map(|(key, value)| format!("{}: {}\n", key, value))
            .collect();
        answer(text)
    }

    fn copy_tags(&mut self, from: &Path, to: &Path) -> Result<ToolResponse> {
        let created = !to.exists();
        if created {
            File::create(to)?;
        }
        let copied = self.entry(from).clone();
        self.entry(to).extend(copied);
        answer(if created {
            "    1 image files created".to_string()
        } else {
            "    1 image files updated".to_string()
        })
    }

    /// `-d <format> -FileName<Field`, `%%-c` numbering like exiftool.
    fn rename(&mut self, args: &[String], path: &Path) -> Result<ToolResponse> {
        let format = args
            .windows(2)
            .find(|w| w[0] == "-d")
            .map(|w| w[1].clone())
            .unwrap_or_default();
        let field = args
            .iter()
            .find_map(|a| a.strip_prefix("-FileName<"))
            .unwrap_or("DateTimeOriginal");
        let date = self
            .value(path, field)
            .or_else(|| UNIFY_DATE_FIELDS.iter().find_map(|f| self.value(path, f)))
            .and_then(|v| parse_exiftool_date(&v));
        let Some(date) = date else {
            return answer("Warning: no date - 0 image files updated".to_string());
        };

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let template = date.format(&format).to_string().replace("%e", ext);
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut copy = 0;
        let target = loop {
            let number = if copy == 0 { String::new() } else { format!("-{}", copy) };
            let candidate = dir.join(template.replace("%-c", &number));
            if !candidate.exists() || candidate == path {
                break candidate;
            }
            copy += 1;
        };

        fs::rename(path, &target)?;
        if let Some(metadata) = self.files.remove(path) {
            self.files.insert(target.clone(), metadata);
        }
        answer(format!(
            "'{}' --> '{}'\n    1 image files updated",
            path.display(),
            target.display()
        ))
    }

    fn write(&mut self, args: &[String], path: &Path) -> Result<ToolResponse> {
        if !path.is_file() {
            return answer("Error: File not found\n    0 image files updated".to_string());
        }
        let metadata = self.entry(path);
        for arg in args {
            let Some(assignment) = arg.strip_prefix('-') else {
                continue;
            };
            if let Some((key, tag)) = assignment.split_once("-=") {
                let mut tags = list_value(metadata, key);
                tags.retain(|t| t != tag);
                store_list(metadata, key, tags);
            } else if let Some((key, tag)) = assignment.split_once("+=") {
                let mut tags = list_value(metadata, key);
                tags.push(tag.to_string());
                store_list(metadata, key, tags);
            } else if let Some((key, value)) = assignment.split_once('=') {
                let key = key.rsplit(':').next().unwrap_or(key);
                if value.is_empty() {
                    metadata.remove(key);
                } else {
                    metadata.insert(key.to_string(), value.to_string());
                }
            }
        }
        answer("    1 image files updated".to_string())
    }
}

/// Tag lists are written under the lower-camel name, read back capitalized.
fn list_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn list_value(metadata: &Metadata, key: &str) -> Vec<String> {
    metadata
        .get(&list_key(key))
        .map(|v| v.split(", ").map(str::to_string).collect())
        .unwrap_or_default()
}

fn store_list(metadata: &mut Metadata, key: &str, tags: Vec<String>) {
    let key = list_key(key);
    if tags.is_empty() {
        metadata.remove(&key);
    } else {
        metadata.insert(key, tags.join(", "));
    }
}

impl MetadataTool for FakeTool {
    fn execute(&mut self, args: &[String]) -> Result<ToolResponse> {
        self.calls.push(args.to_vec());
        if args.iter().any(|a| a == "-s") {
            return self.read(Path::new(&args[0]));
        }
        let Some(target) = args.last().map(PathBuf::from) else {
            return answer(String::new());
        };
        if self.fail_writes {
            return answer("    0 image files updated".to_string());
        }
        if let Some(i) = args.iter().position(|a| a == "-tagsFromFile") {
            let source = PathBuf::from(&args[i + 1]);
            return self.copy_tags(&source, &target);
        }
        if args.iter().any(|a| a.starts_with("-FileName<")) {
            return self.rename(args, &target);
        }
        self.write(args, &target)
    }
}
