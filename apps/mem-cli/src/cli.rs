use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "mem-cli",
    version,
    about = "Per-user agent memory: Markdown notes with semantic search"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Append a note to memory and refresh the index
    Add(AddArgs),
    /// Search memory semantically
    Search(SearchArgs),
    /// Refresh the index, or rebuild it with --force
    Reindex(ReindexArgs),
    /// Show workspace and index state
    State(StateArgs),
    /// Create a workspace
    Init(InitArgs),
    /// Delete a workspace and everything in it
    Destroy(DestroyArgs),
    /// Internal daemon entry point
    #[command(name = "__daemon", hide = true)]
    Daemon(DaemonArgs),
}

/// Workspace selection shared by every user-facing command.
#[derive(Debug, Clone, Args)]
pub struct WorkspaceArgs {
    /// Use the public workspace
    #[arg(long)]
    pub public: bool,
    /// Use the token-scoped workspace
    #[arg(long, conflicts_with = "public", value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AddKind {
    /// Dated note under memory/
    Short,
    /// Long-term memory file
    Long,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    pub kind: AddKind,
    /// Note text; omit when piping with --stdin
    pub text: Vec<String>,
    /// Read the note text from standard input
    #[arg(long)]
    pub stdin: bool,
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Emit machine-readable output
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Free-text query
    #[arg(required = true)]
    pub query: Vec<String>,
    /// Maximum number of hits
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Emit machine-readable output
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReindexArgs {
    /// Reindex every registered workspace
    #[arg(long, conflicts_with_all = ["public", "token"])]
    pub all: bool,
    /// Rebuild from scratch instead of refreshing incrementally
    #[arg(long)]
    pub force: bool,
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Emit machine-readable output
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StateArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Emit machine-readable output
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Required acknowledgement; destroy refuses to run without it
    #[arg(long)]
    pub confirm: bool,
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Run the daemon serve loop
    #[arg(long, conflicts_with = "shutdown")]
    pub serve: bool,
    /// Ask a running daemon to exit
    #[arg(long)]
    pub shutdown: bool,
}
