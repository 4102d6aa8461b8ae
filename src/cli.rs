use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "photosearch",
    about = "Manage and maintain a hybrid photo search index"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage indexed photo folders
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
    /// Preview which photos indexing a folder would pick up
    Scan(ScanArgs),
    /// Check indexed records against the filesystem
    Health(JsonArgs),
    /// List (or remove) records whose files are gone
    Cleanup(CleanupArgs),
    /// Health check followed by cleanup of stale records
    Optimize(JsonArgs),
    /// Show index and folder statistics
    Status(JsonArgs),
    /// Read or write persistent settings
    Setting {
        #[command(subcommand)]
        action: SettingAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Folder subcommands --

#[derive(Debug, Subcommand)]
pub enum FolderAction {
    /// Register a directory for indexing
    Add {
        /// Path to the directory
        path: PathBuf,
        /// Display name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Unregister a folder
    Remove {
        /// Folder id
        id: String,
        /// Also delete every indexed record from this folder
        #[arg(long)]
        delete_vectors: bool,
    },
    /// List registered folders
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one folder
    Show {
        /// Folder id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum SettingAction {
    /// Store a setting
    Set { key: String, value: String },
    /// Print a setting
    Get { key: String },
}

// -- Scan --

#[derive(Debug, Parser)]
pub struct ScanArgs {
    /// Folder id
    pub folder: String,

    /// Keep files whose content is already indexed elsewhere
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Skip full image decoding
    #[arg(long)]
    pub no_verify: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Cleanup --

#[derive(Debug, Parser)]
pub struct CleanupArgs {
    /// Delete stale records instead of only listing them
    #[arg(long)]
    pub apply: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "photosearch",
            &mut std::io::stdout(),
        );
    }
}
