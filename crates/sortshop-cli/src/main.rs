use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use sortshop_core::{
    CancellationToken, Config, ExifTool, Force, Origin, Session, SourcePosition,
};

#[derive(Parser)]
#[command(
    name = "sortshop",
    version,
    about = "Curate a directory of photos: tag, rate, rename and sort"
)]
struct Cli {
    /// Configuration file (default: <config dir>/sortshop/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More output, repeat for more
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ForceArg {
    Toggle,
    In,
    Out,
}

impl From<ForceArg> for Force {
    fn from(arg: ForceArg) -> Self {
        match arg {
            ForceArg::Toggle => Force::Toggle,
            ForceArg::In => Force::In,
            ForceArg::Out => Force::Out,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the working directory and report what was found
    Scan {
        dir: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the prepare pipeline on every file
    Prepare { dir: PathBuf },
    /// Toggle tags or tagset abbreviations on a file
    Tag {
        dir: PathBuf,
        /// File name or 1-based index
        file: String,
        #[arg(required = true)]
        tokens: Vec<String>,
        #[arg(long, value_enum, default_value = "toggle")]
        force: ForceArg,
        /// Add all tokens unless every one is present, then remove them all
        #[arg(long, conflicts_with = "force")]
        group: bool,
        /// Source to write: a sidecar name, or first/last/next/previous
        #[arg(long)]
        source: Option<String>,
    },
    /// Set the XMP rating (-1 to 5)
    Rate {
        dir: PathBuf,
        file: String,
        #[arg(allow_hyphen_values = true)]
        value: i8,
    },
    /// Set the EXIF orientation code (1 to 8)
    Orient { dir: PathBuf, file: String, code: char },
    /// Move a file into the deleted subdirectory, or back
    Delete { dir: PathBuf, file: String },
    /// Move tagged files into subdirectories named after their tags
    Sort { dir: PathBuf },
    /// List tagsets
    Tagsets {
        dir: PathBuf,
        #[arg(long)]
        origin: Option<String>,
    },
    /// Define a tagset and save it
    TagsetSet {
        dir: PathBuf,
        origin: String,
        abbreviation: String,
        /// Comma-separated tags
        tags: String,
    },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn open_session(config: Option<&Path>, dir: &Path) -> anyhow::Result<Session<ExifTool>> {
    let mut cfg = Config::load(config).context("cannot load configuration")?;
    cfg.paths.working_dir = Some(dir.to_path_buf());
    let tool = ExifTool::start(&cfg.exif_tool)?;
    let session = Session::open(cfg, tool)
        .with_context(|| format!("cannot open {}", dir.display()))?;
    Ok(session)
}

fn progress_bar(template: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template(template)?);
    Ok(pb)
}

fn cancel_on_ctrlc() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current file...");
        handler_token.cancel();
    })?;
    Ok(token)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let t_total = std::time::Instant::now();

    match cli.command {
        Commands::Scan { dir, json } => {
            let session = open_session(cli.config.as_deref(), &dir)?;
            let summary = session.summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for item in session.media_list().items() {
                    println!("{}", item.source_names().join("  "));
                }
                eprintln!(
                    "{} media files, {} sidecars, {} deleted",
                    summary.media_files, summary.sidecars, summary.deleted
                );
                for path in &summary.missing_parents {
                    eprintln!("sidecar without media file: {}", path.display());
                }
                for path in &summary.no_access {
                    eprintln!("not writable: {}", path.display());
                }
                if let Some(name) = &summary.duplicate_name {
                    eprintln!("\"{}\" exists in both the working and the deleted directory", name);
                }
            }
            session.close()?;
        }
        Commands::Prepare { dir } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            let token = cancel_on_ctrlc()?;
            let pb = progress_bar("[{bar:40}] {pos}/{len} preparing {msg}")?;
            let bar = pb.clone();
            let callback = move |_: &str, current: u64, total: u64, message: &str| {
                bar.set_length(total);
                bar.set_position(current + 1);
                bar.set_message(message.to_string());
            };
            let report = session.prepare_all(Some(&callback), Some(&token))?;
            pb.finish_and_clear();
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            eprintln!(
                "Done! {} of {} files prepared, {} failed ({:.2}s)",
                report.prepared,
                report.total,
                report.failed,
                t_total.elapsed().as_secs_f64()
            );
            session.close()?;
        }
        Commands::Tag {
            dir,
            file,
            tokens,
            force,
            group,
            source,
        } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            session.jump(&file)?;
            if let Some(source) = source {
                let position: SourcePosition = source.parse()?;
                let active = session.select_source(position)?;
                eprintln!("writing to {}", active.name());
            }
            let changes = if group {
                session.toggle_tag_group(&tokens)?
            } else {
                session.toggle_tags(&tokens, force.into())?
            };
            for tag in &changes.added {
                println!("+ {}", tag);
            }
            for tag in &changes.removed {
                println!("- {}", tag);
            }
            session.close()?;
        }
        Commands::Rate { dir, file, value } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            session.jump(&file)?;
            let rating = session.set_rating(value)?;
            println!("rating {}", rating);
            session.close()?;
        }
        Commands::Orient { dir, file, code } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            session.jump(&file)?;
            let orientation = session.set_orientation(code)?;
            println!("orientation {}", orientation);
            session.close()?;
        }
        Commands::Delete { dir, file } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            session.jump(&file)?;
            let new_path = session.toggle_deleted()?;
            println!("{}", new_path.display());
            session.close()?;
        }
        Commands::Sort { dir } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            let token = cancel_on_ctrlc()?;
            let report = session.sort(None, Some(&token))?;
            for moved in &report.moved {
                println!("{} -> {}", moved.name, moved.destination.display());
            }
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            eprintln!(
                "Done! {} moved, {} without a matching tag, {} deleted skipped",
                report.moved.len(),
                report.unmatched.len(),
                report.skipped_deleted
            );
            session.close()?;
        }
        Commands::Tagsets { dir, origin } => {
            let session = open_session(cli.config.as_deref(), &dir)?;
            let origins = match origin {
                Some(origin) => vec![origin.parse::<Origin>()?],
                None => vec![Origin::Local, Origin::Global],
            };
            for origin in origins {
                for (abbreviation, tags) in session.tagsets().tagsets(origin) {
                    println!("{:<6} {:<12} {}", origin.to_string(), abbreviation, tags.join(","));
                }
            }
            session.close()?;
        }
        Commands::TagsetSet {
            dir,
            origin,
            abbreviation,
            tags,
        } => {
            let mut session = open_session(cli.config.as_deref(), &dir)?;
            let origin: Origin = origin.parse()?;
            let tags: Vec<&str> = tags.split(',').map(str::trim).collect();
            session.update_tagset(origin, &abbreviation, &tags)?;
            session.save_tagsets(origin)?;
            session.close()?;
        }
    }

    Ok(())
}
