pub mod config;
pub mod date;
pub mod error;
pub mod exiftool;
pub mod mediafile;
pub mod medialist;
pub mod naming;
pub mod progress;
pub mod session;
pub mod sidecar;
pub mod source;
pub mod taglist;
pub mod tagsets;

#[cfg(test)]
mod testing;

// Re-export the types front ends need for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use exiftool::{ExifTool, MetadataTool, ToolResponse};
pub use mediafile::{MediaFile, SourcePosition, SourceRef};
pub use medialist::{MediaList, Position, ScanSummary};
pub use progress::{CancellationToken, ProgressCallback, ThrottledProgress};
pub use session::{PrepareReport, Session, SortMove, SortReport};
pub use sidecar::Sidecar;
pub use source::{MetadataSource, SourceFile};
pub use taglist::{Force, TagChanges, TagList, TagsetResolver};
pub use tagsets::{Origin, Tagsets, DEFAULT_TAGSET};
