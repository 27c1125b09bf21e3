use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mare", version, about = "Route tasks to versioned role profiles")]
pub struct Args {
    /// Config file to use instead of `~/.mare/config.toml` / `./config.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task through the pipeline and print its outcome as JSON.
    Submit(SubmitArgs),
    /// Inspect and manage role profiles.
    #[command(subcommand)]
    Profiles(ProfilesCommand),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SubmitArgs {
    pub description: String,

    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub expected: Option<String>,

    #[arg(long)]
    pub archetype: Option<String>,

    /// Request a profile by name.
    #[arg(long)]
    pub role: Option<String>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum ProfilesCommand {
    List(ListArgs),
    Show(ShowArgs),
    /// Store profile JSON files.
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Import `*_rep.json` definitions from a directory.
    Import { dir: PathBuf },
    /// Check a profile file without storing it.
    Validate { file: PathBuf },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ListArgs {
    #[arg(long)]
    pub archetype: Option<String>,

    #[arg(long)]
    pub prefix: Option<String>,

    #[arg(long)]
    pub all_versions: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ShowArgs {
    pub name: String,

    /// Exact version; defaults to the latest.
    #[arg(long)]
    pub version: Option<String>,
}
