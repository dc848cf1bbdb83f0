use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};

mod absorb;
mod commands;
mod config;
mod context;
mod engine;
mod errors;
mod forge;
mod git_backend;
mod git_gateway;
mod graph;
mod journal;
mod merge_exec;
pub mod program_name;
mod ref_store;
mod restack;
mod snapshot;
mod state;
#[cfg(test)]
mod test_context;
pub mod ui;
mod validation;
mod worktree;

use errors::{ConflictPending, EXIT_CONFLICT};
use merge_exec::MergeStrategy;

#[derive(Parser)]
#[command(
    about = "strata: a CLI for stacked branches and stacked pull requests",
    long_about = None,
    version,
    disable_help_subcommand = true,
    help_template = "\
{about}

{usage-heading} {usage}

Get Started:
  init        Initialize strata in your repo
  create      Create a new stacked branch                [c]
  log         Visualize your stack                       [l]

Core Workflow:
  modify      Stage changes and amend                    [m]
  absorb      Absorb staged changes into earlier commits
  submit      Push branches and create PRs               [s]
  sync        Fetch trunk and realign the stack
  merge       Merge the stack's PRs

Manage Stack:
  restack     Rebase branches onto their parents
  move        Move a branch to a new parent
  split       Split a branch at a commit
  squash      Squash a branch's commits
  delete      Delete a branch

Recovery:
  continue    Resume after resolving conflicts           [cont]
  abort       Cancel and roll back the operation
  undo        Restore a pre-operation snapshot

Setup:
  track       Start tracking a branch
  untrack     Stop tracking a branch
  checkout    Switch to a branch                         [co]
  info        Show branch details
  config      Configuration settings                     [cfg]
  completion  Generate shell completions

Options:
  -v, --verbose  Show git commands being executed
  -n, --dry-run  Preview without executing
  -h, --help     Print help
  -V, --version  Print version

Run '{bin} <command> --help' for more information on a command.
"
)]
pub struct Cli {
    /// Show git commands being executed
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Preview destructive operations without executing them
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize strata in your repo
    Init {
        /// Trunk branch name (defaults to main/master if found)
        #[arg(long)]
        trunk: Option<String>,
        /// Reset strata (untrack all branches and reinitialize)
        #[arg(long)]
        reset: bool,
    },

    /// Create a new stacked branch
    #[command(
        visible_alias = "c",
        after_help = "\
Examples:
  create Add login flow       Branch named from the message, commit staged changes
  create --name fix-crash     Explicit branch name, no commit
  create -a Fix the bug       Stage everything and commit"
    )]
    Create {
        /// Commit message; the branch name derives from it
        message: Vec<String>,
        /// Explicit branch name (overrides the pattern)
        #[arg(long)]
        name: Option<String>,
        /// Scope token (e.g. a ticket id), inherited by descendants
        #[arg(long)]
        scope: Option<String>,
        /// Stage all changes before committing
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Visualize your stack
    #[command(visible_alias = "l", visible_alias = "ls")]
    Log,

    /// Stage changes and amend the current branch
    #[command(visible_alias = "m")]
    Modify {
        /// Stage all changes first
        #[arg(short = 'a', long)]
        all: bool,
        /// Commit message
        #[arg(short = 'm', long)]
        message: Option<String>,
        /// Create a new commit instead of amending
        #[arg(short = 'c', long)]
        commit: bool,
    },

    /// Absorb staged changes into the stack commits that depend on them
    Absorb {
        /// Stage all changes before absorbing
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Push branches and create PRs
    #[command(visible_alias = "s")]
    Submit {
        /// Submit the entire stack (ancestors and descendants)
        #[arg(long)]
        stack: bool,
        /// Create new PRs as drafts
        #[arg(short = 'd', long)]
        draft: bool,
        /// Don't open PR URLs in the browser
        #[arg(long)]
        no_open: bool,
    },

    /// Fetch trunk and realign the stack
    Sync {
        /// Keep merged branches instead of deleting them
        #[arg(long)]
        keep: bool,
        /// Skip cleanup of merged branches entirely
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Merge the stack's PRs from the command line
    Merge {
        /// Merge strategy
        #[arg(long, value_enum, default_value = "bottom-up")]
        strategy: MergeStrategy,
        /// Proceed past drafts, CI problems, and diverged remotes
        #[arg(short = 'f', long)]
        force: bool,
        /// Run the plan in a detached worktree, leaving your checkout alone
        #[arg(long)]
        worktree: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Rebase branches onto their parents
    Restack {
        /// Branch to start from (default: current branch)
        #[arg(short = 'b', long)]
        branch: Option<String>,
        /// Restack only this branch (no descendants)
        #[arg(long)]
        only: bool,
        /// Restack ancestors down to trunk
        #[arg(long)]
        downstack: bool,
        /// Restack the branch and its descendants
        #[arg(long)]
        upstack: bool,
    },

    /// Move a branch (and its subtree) to a new parent
    Move {
        /// Target parent branch
        #[arg(long)]
        onto: Option<String>,
        /// Branch to move (defaults to current)
        #[arg(long)]
        source: Option<String>,
    },

    /// Split the current branch at a commit
    Split {
        /// Name for the new (lower) branch
        new_branch: String,
        /// Commit to split at (e.g. HEAD~1, abc123)
        #[arg(long)]
        at: String,
    },

    /// Squash the current branch's commits into one
    #[command(visible_alias = "sq")]
    Squash {
        /// Commit message for the squashed commit
        #[arg(short = 'm', long)]
        message: Option<String>,
    },

    /// Delete a branch
    Delete {
        /// Branch to delete (defaults to current)
        name: Option<String>,
        /// Delete even if not merged into its parent
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Resume the interrupted operation
    #[command(visible_alias = "cont")]
    Continue,

    /// Cancel the interrupted operation and roll back
    Abort,

    /// Restore a pre-operation snapshot
    Undo {
        /// List available snapshots
        #[arg(long)]
        list: bool,
        /// Snapshot to restore (0 = newest, as shown by --list)
        #[arg(long)]
        index: Option<usize>,
        /// Skip the confirmation prompt
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Start tracking a branch
    Track {
        /// Branch to track (defaults to current)
        branch: Option<String>,
        /// Parent branch (defaults to trunk)
        #[arg(short = 'p', long)]
        parent: Option<String>,
        /// Scope token (e.g. a ticket id)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Stop tracking a branch
    Untrack { branch: Option<String> },

    /// Switch to a branch
    #[command(visible_alias = "co")]
    Checkout {
        /// Branch to checkout (lists tracked branches when omitted)
        name: Option<String>,
    },

    /// Show branch details
    Info {
        /// Branch to inspect (defaults to current)
        branch: Option<String>,
    },

    /// Configuration settings
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::shells::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set {
        key: String,
        value: String,
        /// Set in the repo-local layer (.git/strata/) instead of user config
        #[arg(long)]
        local: bool,
    },
    /// Unset a configuration value
    Unset {
        key: String,
        /// Unset in the repo-local layer instead of user config
        #[arg(long)]
        local: bool,
    },
}

impl clap::ValueEnum for MergeStrategy {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            MergeStrategy::BottomUp,
            MergeStrategy::TopDown,
            MergeStrategy::Consolidate,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            MergeStrategy::BottomUp => "bottom-up",
            MergeStrategy::TopDown => "top-down",
            MergeStrategy::Consolidate => "consolidate",
        }))
    }
}

/// Install the ctrl-c handler: continuation state is saved at every
/// checkpoint, so interruption only needs to tell the user how to resume.
fn install_signal_handler() {
    ctrlc::set_handler(|| {
        eprintln!("\n\nOperation interrupted. Run:");
        eprintln!("  {} continue   to continue", program_name::program_name());
        eprintln!("  {} abort      to roll back", program_name::program_name());
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");
}

#[tokio::main]
async fn main() {
    install_signal_handler();

    let prog_name = program_name::program_name();
    let matches = Cli::command().name(prog_name).get_matches();
    let cli = Cli::from_arg_matches(&matches).expect("Failed to parse arguments");

    // Thread-local for synchronous code, task-local for async propagation
    context::ExecutionContext::init(cli.verbose, cli.dry_run);
    let ctx = context::ExecutionContext::new(cli.verbose, cli.dry_run);

    let command = match &cli.command {
        Some(cmd) => cmd,
        None => {
            eprintln!("No command provided. Run '{} --help' for usage.", prog_name);
            std::process::exit(1);
        }
    };

    let result = context::with_context(ctx, async {
        match command {
            Commands::Init { trunk, reset } => commands::init::run(trunk.clone(), *reset),
            Commands::Create {
                message,
                name,
                scope,
                all,
            } => commands::create::run(message.clone(), name.clone(), scope.clone(), *all),
            Commands::Log => commands::log::run(),
            Commands::Modify { all, message, commit } => commands::modify::run(*all, message.clone(), *commit),
            Commands::Absorb { all } => commands::absorb::run(*all),
            Commands::Submit { stack, draft, no_open } => commands::submit::run(*stack, *draft, *no_open).await,
            Commands::Sync { keep, no_cleanup } => commands::sync::run(*no_cleanup, *keep).await,
            Commands::Merge {
                strategy,
                force,
                worktree,
                yes,
            } => commands::merge::run(*strategy, *force, *worktree, *yes).await,
            Commands::Restack {
                branch,
                only,
                downstack,
                upstack,
            } => commands::restack::run(branch.clone(), *only, *downstack, *upstack),
            Commands::Move { onto, source } => commands::move_cmd::run(onto.clone(), source.clone()),
            Commands::Split { new_branch, at } => commands::split::run(new_branch.clone(), at.clone()),
            Commands::Squash { message } => commands::squash::run(message.clone()),
            Commands::Delete { name, force } => commands::delete::run(name.clone(), *force),
            Commands::Continue => commands::continue_op::run(),
            Commands::Abort => commands::abort::run(),
            Commands::Undo { list, index, force } => commands::undo::run(*list, *index, *force),
            Commands::Track { branch, parent, scope } => {
                commands::track::run_track(branch.clone(), parent.clone(), scope.clone())
            }
            Commands::Untrack { branch } => commands::track::run_untrack(branch.clone()),
            Commands::Checkout { name } => commands::checkout::run(name.clone()),
            Commands::Info { branch } => commands::info::run(branch.clone()),
            Commands::Config { action } => match action {
                Some(ConfigAction::Show) | None => commands::config_cmd::show(),
                Some(ConfigAction::Get { key }) => commands::config_cmd::get(key),
                Some(ConfigAction::Set { key, value, local }) => commands::config_cmd::set(key, value, *local),
                Some(ConfigAction::Unset { key, local }) => commands::config_cmd::unset(key, *local),
            },
            Commands::Completion { shell } => commands::completion::run(*shell),
        }
    })
    .await;

    if let Err(e) = result {
        // Conflicts already printed their guidance; they get the dedicated
        // exit code so scripts can distinguish "resolve and continue"
        if e.downcast_ref::<ConflictPending>().is_some() {
            std::process::exit(EXIT_CONFLICT);
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
