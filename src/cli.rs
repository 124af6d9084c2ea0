//! CLI front-end (SPEC_FULL.md §5.8 / spec.md §6).
//!
//! A thin collaborator: parses a PID and a variable name and hands them to
//! the engine. Uses `clap`'s derive API the way the teacher's own
//! `main.rs` does, rather than building the parser by hand.

use clap::Parser;

/// Reads an environment variable out of a running process via ptrace.
#[derive(Parser, Debug)]
#[clap(name = "renv", version)]
pub struct Cli {
    /// Target process id.
    #[clap(short = 'p', long = "pid", allow_hyphen_values = true)]
    pub pid: i32,

    /// Environment variable name to look up.
    #[clap(short = 'e', long = "env")]
    pub name: String,

    /// Increase logging verbosity; repeat for more detail.
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
