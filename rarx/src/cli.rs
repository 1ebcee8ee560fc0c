use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rarx_format::{MatchMode, OverwritePolicy, PathMatcher};

#[derive(Debug, Parser)]
#[command(
    name = "rarx",
    about = "List, test and extract RAR archives.",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(visible_aliases = ["l", "ls"], about = "List files in an archive")]
    List(ListArgs),

    #[command(visible_alias = "x", about = "Extract files from an archive")]
    Extract(ExtractArgs),

    #[command(visible_alias = "t", about = "Verify archive checksums")]
    Test(TestArgs),

    #[command(about = "Show archive properties")]
    Info(InfoArgs),
}

/// Options for opening an archive, shared by every subcommand.
#[derive(Debug, clap::Args)]
pub struct OpenArgs {
    /// Path to the archive, or to the first volume of a set
    pub archive: PathBuf,

    /// Password for encrypted archives (`-p=SECRET`); prompts when given
    /// without a value. Falls back to the RARX_PASSWORD environment variable.
    #[arg(
        short = 'p',
        long = "password",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "",
        value_name = "PASSWORD"
    )]
    pub password: Option<String>,

    /// Read every header instead of using the quick open record
    #[arg(long)]
    pub no_quick_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatchArg {
    /// Masks match the whole path
    Exact,
    /// Masks match the file name only
    Names,
    /// Masks match a path or anything below it
    Subpath,
    /// Masks must be a directory prefix of the path
    SubpathOnly,
    /// Wildcards also match '/'
    AllWild,
}

impl From<MatchArg> for MatchMode {
    fn from(arg: MatchArg) -> Self {
        match arg {
            MatchArg::Exact => MatchMode::Exact,
            MatchArg::Names => MatchMode::Names,
            MatchArg::Subpath => MatchMode::SubPath,
            MatchArg::SubpathOnly => MatchMode::SubPathOnly,
            MatchArg::AllWild => MatchMode::AllWild,
        }
    }
}

/// Entry selection, shared by `extract` and `test`.
#[derive(Debug, clap::Args)]
pub struct SelectArgs {
    /// Exclude entries matching mask
    #[arg(short = 'x', long = "exclude", value_name = "MASK")]
    pub exclude: Vec<String>,

    /// How masks are matched against entry names
    #[arg(long = "match", value_enum, default_value_t = MatchArg::Subpath)]
    pub match_mode: MatchArg,

    /// Match masks case sensitively
    #[arg(long)]
    pub case_sensitive: bool,

    /// Entries to process (all if none specified)
    #[arg(value_name = "MASK")]
    pub files: Vec<String>,
}

impl SelectArgs {
    pub fn matcher(&self) -> PathMatcher {
        let matcher = PathMatcher::new(self.match_mode.into()).case_sensitive(self.case_sensitive);
        let matcher = self.files.iter().fold(matcher, |m, mask| m.include(mask.as_str()));
        self.exclude.iter().fold(matcher, |m, mask| m.exclude(mask.as_str()))
    }
}

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    /// Show detailed information (times, attributes, checksums)
    #[arg(short = 'l', long)]
    pub long: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
#[command(group(clap::ArgGroup::new("overwrite").args(["yes", "no", "rename", "ask"])))]
pub struct ExtractArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    /// Output directory (defaults to current directory)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Overwrite existing files without asking
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Never overwrite existing files
    #[arg(short = 'n', long)]
    pub no: bool,

    /// Extract to a new name when a file exists
    #[arg(short = 'r', long)]
    pub rename: bool,

    /// Ask for every existing file
    #[arg(long)]
    pub ask: bool,

    /// Skip checksum verification
    #[arg(long)]
    pub no_checksum: bool,

    /// Keep files that fail verification
    #[arg(long)]
    pub keep_broken: bool,

    /// Suppress output (quiet mode)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    #[command(flatten)]
    pub select: SelectArgs,
}

impl ExtractArgs {
    pub fn overwrite(&self) -> OverwritePolicy {
        if self.yes {
            OverwritePolicy::ReplaceAll
        } else if self.no {
            OverwritePolicy::SkipAll
        } else if self.rename {
            OverwritePolicy::AutoRename
        } else if self.ask {
            OverwritePolicy::ForceAsk
        } else {
            OverwritePolicy::Default
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct TestArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    /// Suppress output (quiet mode)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Test entries one after another (disable parallel testing)
    #[arg(long)]
    pub serial: bool,

    /// Number of parallel test threads (default: CPU count)
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    #[command(flatten)]
    pub select: SelectArgs,
}

#[derive(Debug, clap::Args)]
pub struct InfoArgs {
    #[command(flatten)]
    pub open: OpenArgs,
}
