
use anyhow::Result;
use clap::Parser;
use crate::commands::{completions, export, revmap};

pub const HELP_TEMPLATE: &str = "\
{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}";

/// Subversion to Git fast-export utilities.
#[derive(Debug, Parser)]
#[command(
    name = "svnex",
    version,
    about = "Subversion to Git fast-export utilities",
    propagate_version = true,
)]
pub enum Commands {
    Export(export::Export),
    Revmap(revmap::Revmap),
    Completions(completions::Completions),
}

pub trait Run {
    fn run(&mut self) -> Result<()>;
}

impl Run for Commands {
    fn run(&mut self) -> Result<()> {
        match self {
            Commands::Export(cmd) => cmd.run(),
            Commands::Revmap(cmd) => cmd.run(),
            Commands::Completions(cmd) => cmd.run(),
        }
    }
}
