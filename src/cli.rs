use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(version, about = "The cloak language interpreter")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a source file
    Run {
        /// Path to the source file
        file: PathBuf,
    },

    /// Check a source file for syntax errors and dump its tokens
    Check {
        /// Path to the source file to check
        file: PathBuf,
    },

    /// Start an interactive REPL session
    Repl,
}
