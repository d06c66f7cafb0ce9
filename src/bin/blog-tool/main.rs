use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::run_cmd;

mod commands;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config path. Without it blogstore.toml is searched, or BLOG_REPO_PATH is used
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Prints results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates, commits and pushes a new post
    Create(CreateArgs),
    /// Lists posts, newest first
    List(ListArgs),
    /// Prints a post file
    Get(PostRef),
    /// Searches titles and bodies
    Search(SearchArgs),
    /// Deletes a post, commits and pushes
    Delete(PostRef),
    /// Fast-forwards the working tree to the remote branch
    Sync,
    /// Shows the working tree status
    Status,
    /// Shows the most recent commits
    Log(LogArgs),
    /// Compares the posts of two languages
    Translations(TranslationArgs),
    /// Writes a sample configuration file
    SampleConfig(SampleArgs),
}

#[derive(Parser, Debug)]
struct CreateArgs {
    /// Title of the post
    #[arg(short, long)]
    title: String,

    /// File with the markdown body. Reads stdin when absent
    #[arg(short, long)]
    body_file: Option<PathBuf>,

    /// ko or en
    #[arg(short, long, default_value = "ko")]
    language: String,

    /// Comma separated tags
    #[arg(long)]
    tags: Option<String>,

    /// Comma separated categories. Defaults to the configured ones
    #[arg(long)]
    categories: Option<String>,

    #[arg(long)]
    draft: bool,

    /// Explicit file name instead of the generated one
    #[arg(long)]
    filename: Option<String>,
}

#[derive(Parser, Debug)]
struct ListArgs {
    #[arg(short, long)]
    language: Option<String>,

    #[arg(long)]
    tag: Option<String>,

    /// Hides drafts
    #[arg(long)]
    no_drafts: bool,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Parser, Debug)]
struct PostRef {
    filename: String,

    #[arg(short, long)]
    language: Option<String>,
}

#[derive(Parser, Debug)]
struct SearchArgs {
    query: String,

    #[arg(short, long)]
    language: Option<String>,
}

#[derive(Parser, Debug)]
struct LogArgs {
    #[arg(short = 'n', long, default_value_t = 10)]
    limit: usize,
}

#[derive(Parser, Debug)]
struct TranslationArgs {
    #[arg(long, default_value = "ko")]
    source: String,

    #[arg(long, default_value = "en")]
    target: String,
}

#[derive(Parser, Debug)]
struct SampleArgs {
    /// Output file
    #[arg(short, long, default_value = "blogstore.toml")]
    out_file: PathBuf,

    /// Commit author name. If empty, OS user real name is being used
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cmd(cli).await
}
