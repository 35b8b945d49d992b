use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lig",
    about = "Ligature: inspect and load linked documents",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Load options as TOML
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the header and block list of a document
    Inspect(InspectArgs),
    /// Show the struct table a document was written with
    Schema(SchemaArgs),
    /// Load a document with its libraries and report the result
    Load(LoadArgs),
}

#[derive(Args)]
pub struct InspectArgs {
    pub path: PathBuf,
    /// Show at most this many blocks
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Show the first bytes of each payload in hex
    #[arg(long, default_value = "0")]
    pub peek: usize,
}

#[derive(Args)]
pub struct SchemaArgs {
    pub path: PathBuf,
    /// Only structs whose name contains this
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Args)]
pub struct LoadArgs {
    pub path: PathBuf,
    /// Do not open libraries
    #[arg(long)]
    pub shallow: bool,
    /// List library objects in the main database
    #[arg(long)]
    pub join: bool,
}
