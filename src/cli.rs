use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::formats::Version;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Data directory (overrides DOCGRAPH_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a document and build its regular structure.
    Ingest(IngestArgs),
    /// List documents.
    List,
    /// Print the structure of one version as JSON.
    Show(ShowArgs),
    /// Report whether the enhanced version exists.
    Status(DocumentArgs),
    /// Generate the enhanced version (or regenerate it with --force).
    Enhance(EnhanceArgs),
    /// Delete a document with all of its structure, pages and images.
    Delete(DocumentArgs),
    /// Remove structure no bound version can reach.
    Sweep,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Path to the document.
    pub file: PathBuf,

    /// Title used when the extractor finds none. Defaults to the file name.
    #[arg(long)]
    pub title: Option<String>,
}

#[derive(Debug, Args)]
pub struct DocumentArgs {
    pub document_id: String,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub document_id: String,

    #[arg(long, value_enum, default_value_t = Version::Regular)]
    pub version: Version,
}

#[derive(Debug, Args)]
pub struct EnhanceArgs {
    pub document_id: String,

    /// Build a new enhanced version even if one exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}
