use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iamsync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative reconciliation of IAM groups, identities and policies", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that override the settings file
#[derive(Args, Clone, Default)]
pub struct GlobalArgs {
    /// AWS CLI profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Desired-state file (JSON or TOML)
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,

    /// Number of parallel remote calls
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Preview the operations needed to reach the desired state
    Plan(PlanArgs),

    /// Apply the desired state
    Apply(ApplyArgs),

    /// Adopt existing remote entities that are not tracked yet
    Import(ImportArgs),

    /// Show the remote state
    Status(StatusArgs),

    /// Validate the desired-state file offline
    Validate,

    /// Manage access keys
    #[command(subcommand)]
    Keys(KeysCommand),

    /// Remove identities from groups
    #[command(subcommand)]
    Members(MembersCommand),

    /// Delete identities
    #[command(subcommand)]
    Identities(IdentitiesCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Limit to a kind or entity (e.g. groups, group.Ops, identity/alice)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Limit to a kind or entity (e.g. groups, group.Ops, identity/alice)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Show what would be done without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Only record adoptions of untracked entities
    #[arg(long)]
    pub import_only: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Track entities without merging them into the desired-state file
    #[arg(long)]
    pub no_write: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Limit to a kind or entity (e.g. groups, group.Ops, identity/alice)
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Subcommand)]
pub enum KeysCommand {
    /// List an identity's access keys
    List {
        /// Identity name
        identity: String,
    },

    /// Delete one access key
    Revoke {
        /// Identity name
        identity: String,

        /// Access key id
        key_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum MembersCommand {
    /// Remove an identity from a group, remotely and in the desired-state file
    Remove {
        /// Identity name
        identity: String,

        /// Group name
        group: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum IdentitiesCommand {
    /// Delete an identity with its keys, login and memberships, and stop
    /// declaring and tracking it
    Delete {
        /// Identity name
        identity: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show resolved settings and file locations
    Show,
}
