use std::path::PathBuf;

use anyhow::Result;
use changekit::changeset::Classifier;
use changekit::config::CONFIG_FILE;
use changekit::merge::MergeStrategy;
use changekit::telemetry;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod commands;
mod format;

use format::OutputFormat;

/// Compute, check, merge and export changesets between snapshots
///
/// A changeset is the difference between two snapshots of a directory tree,
/// classified into added, modified and removed paths. Snapshots live in a
/// content-addressed store and are named by their digest.
///
/// QUICK START:
///
///   changekit import ./before          # prints a snapshot digest
///   changekit import ./after
///   changekit changes <BEFORE> <AFTER>
///   changekit patch <BEFORE> <AFTER> > change.patch
///
/// COMBINING CHANGESETS:
///
///   changekit conflicts <B>..<A1> <B>..<A2>
///   changekit merge <B>..<A1> <B>..<A2> --strategy last-wins
///
/// Logging is controlled by CHANGEKIT_LOG (an env-filter directive) and
/// CHANGEKIT_LOG_FORMAT=json.
#[derive(Parser)]
#[command(name = "changekit")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'changekit <command> --help' for more information on a specific command.")]
struct Cli {
    /// Snapshot store directory (overrides [store].root)
    #[arg(long, global = true, env = "CHANGEKIT_STORE")]
    store: Option<PathBuf>,

    /// Config file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Output format: text or json
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a directory (or a git revision) into the store
    ///
    /// Prints the digest of the resulting snapshot.
    Import {
        /// Directory to import
        #[arg(required_unless_present = "git")]
        path: Option<PathBuf>,

        /// Import a revision from this git repository instead
        #[arg(long, conflicts_with = "path")]
        git: Option<PathBuf>,

        /// Revision to import with --git
        #[arg(long, default_value = "HEAD", requires = "git")]
        rev: String,
    },

    /// Classify the differences between two plain directories
    ///
    /// Runs the configured diff tool directly; nothing is stored.
    Diff {
        old: PathBuf,
        new: PathBuf,
    },

    /// Show the changeset between two snapshots
    Changes {
        before: String,
        after: String,

        /// Override the configured classifier (listing or diff-tool)
        #[arg(long)]
        classifier: Option<Classifier>,
    },

    /// Render a changeset as a unified patch
    ///
    /// The patch is stored as a snapshot of its own. Without --output the
    /// patch text goes to stdout.
    Patch {
        before: String,
        after: String,

        /// Write the patch here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Apply a changeset onto a directory
    ///
    /// Removed paths are deleted, then added and modified content is
    /// written. Anything else in DEST is left alone.
    Export {
        before: String,
        after: String,
        dest: PathBuf,

        /// Only export the part of the tree below this path
        #[arg(long)]
        subpath: Option<String>,
    },

    /// Report conflicts among changesets given as BEFORE..AFTER
    ///
    /// Exits non-zero when any conflict is found.
    Conflicts {
        #[arg(required = true, num_args = 2..)]
        ranges: Vec<String>,
    },

    /// Merge changesets given as BEFORE..AFTER onto the first one's base
    Merge {
        #[arg(required = true)]
        ranges: Vec<String>,

        /// fail, first-wins, last-wins, leave-conflicts, prefer-ours or
        /// prefer-theirs (default from config)
        #[arg(long)]
        strategy: Option<MergeStrategy>,
    },

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "changekit", &mut std::io::stdout());
        return Ok(());
    }

    let ctx = commands::Context::open(&cli.config, cli.store, cli.format)?;
    match cli.command {
        Commands::Import { path, git, rev } => commands::import(&ctx, path, git, &rev),
        Commands::Diff { old, new } => commands::diff(&ctx, &old, &new),
        Commands::Changes {
            before,
            after,
            classifier,
        } => commands::changes(&ctx, &before, &after, classifier),
        Commands::Patch {
            before,
            after,
            output,
        } => commands::patch(&ctx, &before, &after, output.as_deref()),
        Commands::Export {
            before,
            after,
            dest,
            subpath,
        } => commands::export(&ctx, &before, &after, &dest, subpath.as_deref()),
        Commands::Conflicts { ranges } => commands::conflicts(&ctx, &ranges),
        Commands::Merge { ranges, strategy } => commands::merge_changesets(&ctx, &ranges, strategy),
        Commands::Completions { .. } => Ok(()),
    }
}
