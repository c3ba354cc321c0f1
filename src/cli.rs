//! Command-line surface (`SPEC_FULL.md` §1.3), split the way the teacher's `cli.rs` +
//! `bin/customer.rs` is: argument parsing here, dispatch in `bin/main.rs`.

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "morango-sync")]
#[non_exhaustive]
pub struct Cli {
    #[structopt(long)]
    pub config: Option<PathBuf>,
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Push `filter`-scoped records to the configured peer.
    Push(Push),
    /// Pull `filter`-scoped records from the configured peer.
    Pull(Pull),
    /// List locally recorded sync and transfer sessions.
    Status(Status),
    /// Close the active sync session with the configured peer.
    Close(Close),
    /// Open the configuration file in `$EDITOR`, creating a default one first if absent.
    Configure(Configure),
}

#[derive(Debug, StructOpt)]
#[non_exhaustive]
pub struct Push {
    pub filter: String,
}

#[derive(Debug, StructOpt)]
#[non_exhaustive]
pub struct Pull {
    pub filter: String,
}

#[derive(Debug, StructOpt)]
#[non_exhaustive]
pub struct Status {}

#[derive(Debug, StructOpt)]
#[non_exhaustive]
pub struct Close {}

#[derive(Debug, StructOpt)]
#[non_exhaustive]
pub struct Configure {}
