//! Client for the external metadata tool.
//!
//! All metadata reads and writes go through [`MetadataTool`]. The production
//! implementation keeps a single exiftool process open for the whole session
//! (`-stay_open True -@ -`) and feeds it one request at a time: arguments one
//! per line, terminated by `-execute`, answered by everything up to `{ready}`.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ExifToolConfig;
use crate::error::{Error, Result};

const READY_SIGN: &str = "{ready}";

static UPDATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) image files? updated").unwrap());
static CREATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) image files? created").unwrap());
static UNCHANGED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) image files? unchanged").unwrap());
static NEW_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']+' --> '([^']+)'").unwrap());

/// The thin envelope the core reads out of a tool answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub updated: u32,
    pub created: u32,
    pub unchanged: u32,
    /// Target of a rename (`'old' --> 'new'`)
    pub new_name: Option<String>,
}

fn count(re: &Regex, raw: &str) -> u32 {
    re.captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

impl ToolResponse {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim().to_string();
        let response = Self {
            updated: count(&UPDATED_RE, &text),
            created: count(&CREATED_RE, &text),
            unchanged: count(&UNCHANGED_RE, &text),
            new_name: NEW_NAME_RE
                .captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            text,
        };
        log::debug!(
            "result: updated: {} created: {} unchanged: {} new_name: {:?}",
            response.updated,
            response.created,
            response.unchanged,
            response.new_name
        );
        response
    }
}

/// A batch command executor for metadata reads and writes.
///
/// Requests are strictly serialized: one in flight at any time.
pub trait MetadataTool {
    fn execute(&mut self, args: &[String]) -> Result<ToolResponse>;

    /// Release the tool; later requests fail.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: MetadataTool + ?Sized> MetadataTool for &mut T {
    fn execute(&mut self, args: &[String]) -> Result<ToolResponse> {
        (**self).execute(args)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Long-lived exiftool process.
///
/// Shut down explicitly with [`ExifTool::shutdown`]; dropping it does the same
/// on any other exit path.
pub struct ExifTool {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl ExifTool {
    pub fn start(cfg: &ExifToolConfig) -> Result<Self> {
        let mut command = Command::new(&cfg.executable);
        if let Some(config) = &cfg.config {
            command.arg("-config").arg(config);
        }
        command
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            Error::Tool(format!("cannot start {}: {}", cfg.executable.display(), e))
        })?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Tool("no stdout pipe".to_string()))?;
        log::info!("started ExifTool ({})", cfg.executable.display());

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.write_all(b"-stay_open\nFalse\n")?;
        stdin.flush()?;
        drop(stdin);
        self.child.wait()?;
        log::info!("shut down ExifTool");
        Ok(())
    }
}

impl MetadataTool for ExifTool {
    fn execute(&mut self, args: &[String]) -> Result<ToolResponse> {
        if args.iter().any(|a| a.contains('\n')) {
            return Err(Error::Validation(
                "tool arguments must not contain line breaks".to_string(),
            ));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Tool("exiftool already shut down".to_string()))?;

        log::debug!("command: {}", args.join(" "));
        let mut request = args.join("\n");
        request.push_str("\n-execute\n");
        stdin.write_all(request.as_bytes())?;
        stdin.flush()?;

        // the ready sign ends with "\r\n" on Windows, trim_end covers both
        let mut raw = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(Error::Tool("exiftool exited unexpectedly".to_string()));
            }
            if line.trim_end() == READY_SIGN {
                break;
            }
            raw.push_str(&line);
        }
        Ok(ToolResponse::parse(&raw))
    }

    fn close(&mut self) -> Result<()> {
        self.stop()
    }
}

impl Drop for ExifTool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("failed to shut down ExifTool: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_counts() {
        let r = ToolResponse::parse(
            "    1 image files updated\n    12 image files unchanged\n",
        );
        assert_eq!(r.updated, 1);
        assert_eq!(r.unchanged, 12);
        assert_eq!(r.created, 0);
        assert_eq!(r.new_name, None);
    }

    #[test]
    fn parses_rename() {
        let r = ToolResponse::parse(
            "'/p/a.jpg' --> '/p/IMG_20200423_205300.jpg'\n    1 image files updated",
        );
        assert_eq!(r.updated, 1);
        assert_eq!(r.new_name.as_deref(), Some("/p/IMG_20200423_205300.jpg"));
    }

    #[test]
    fn missing_counts_default_to_zero() {
        let r = ToolResponse::parse("Warning: nothing to do");
        assert_eq!((r.updated, r.created, r.unchanged), (0, 0, 0));
        assert_eq!(r.text, "Warning: nothing to do");
    }
}
