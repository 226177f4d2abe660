//! CLI struct definitions for the `tissue` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::plugins::graph::DepType;
use crate::plugins::issues::IssueStatus;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(
    name = "tissue",
    version = env!("CARGO_PKG_VERSION"),
    about = "Issue dependency graph and readiness engine: agents pick, claim and certify work through it."
)]
pub(crate) struct Cli {
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "json")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the `.tissue/` store in the current directory.
    Init,
    /// Create an issue.
    Create {
        #[clap(value_name = "TITLE")]
        title: String,
        #[clap(long, default_value = "")]
        body: String,
        #[clap(long)]
        priority: Option<i64>,
        /// Tag to attach (repeatable).
        #[clap(long = "tag", short = 't')]
        tags: Vec<String>,
        /// Shorthand for `--spec '{"role": ROLE}'`.
        #[clap(long)]
        role: Option<String>,
        /// Execution spec as a JSON object.
        #[clap(long)]
        spec: Option<String>,
        /// Attach under this parent.
        #[clap(long)]
        parent: Option<String>,
    },
    /// Show one issue with tags and comments.
    Show { id: String },
    /// Edit fields of an issue.
    Edit {
        id: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        body: Option<String>,
        #[clap(long)]
        priority: Option<i64>,
        #[clap(long = "add-tag")]
        add_tags: Vec<String>,
        #[clap(long = "remove-tag")]
        remove_tags: Vec<String>,
        /// Merge `{"role": ROLE}` into the execution spec.
        #[clap(long)]
        role: Option<String>,
        /// Replace the execution spec.
        #[clap(long)]
        spec: Option<String>,
    },
    /// Set the status of an issue. `closed` requires `--outcome`.
    Status {
        id: String,
        #[clap(value_enum)]
        status: IssueStatus,
        #[clap(long)]
        outcome: Option<String>,
    },
    /// Close an issue.
    Close {
        id: String,
        #[clap(long, default_value = "success")]
        outcome: String,
    },
    /// Reopen an issue and clear its outcome.
    Reopen { id: String },
    /// Append a comment.
    Comment {
        id: String,
        body: String,
        #[clap(long)]
        author: Option<String>,
    },
    /// Add a dependency edge: `SRC parent DST` or `SRC blocks DST`.
    Dep {
        src: String,
        #[clap(value_enum)]
        dep_type: DepType,
        dst: String,
    },
    /// Deactivate a dependency edge.
    Undep {
        src: String,
        #[clap(value_enum)]
        dep_type: DepType,
        dst: String,
    },
    /// Direct children of an issue.
    Children { id: String },
    /// Ancestors of an issue, nearest first.
    Ancestors { id: String },
    /// Issues blocking this one.
    Blockers { id: String },
    /// List issues, oldest first.
    List {
        #[clap(long, value_enum)]
        status: Option<IssueStatus>,
        #[clap(long)]
        tag: Option<String>,
        #[clap(long)]
        root: Option<String>,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Ready leaves by priority.
    Ready {
        #[clap(long)]
        root: Option<String>,
        #[clap(long = "tag", short = 't')]
        tags: Vec<String>,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// In-progress issues, oldest first.
    Resumable {
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Atomically claim a ready leaf.
    Claim { id: String },
    /// Resolve the owning team of an issue.
    Team {
        id: String,
        #[clap(long)]
        default_team: Option<String>,
    },
    /// Structural DAG checks over a subtree.
    Validate { root: String },
    /// Orchestration checks over a subtree: termination, orphans, teams.
    ValidateSubtree { root: String },
    /// Audit events for an issue.
    History { id: String },
}
