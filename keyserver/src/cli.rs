use std::path::PathBuf;

use abscissa_core::{Command, Runnable};
use clap::{Parser, builder::Styles};

#[derive(Debug, Parser, Command)]
#[command(author, about, version)]
#[command(help_template = format!("\
{{before-help}}{{about-with-newline}}
{}Usage:{} {{usage}}

{{all-args}}{{after-help}}\
    ",
    Styles::default().get_usage().render(),
    Styles::default().get_usage().render_reset()))]
pub struct EntryPoint {
    #[command(subcommand)]
    pub(crate) cmd: KeyServerCmd,

    /// Enable verbose logging
    #[arg(short, long)]
    pub(crate) verbose: bool,

    /// Specify the data directory for the keyserver [default: ~/.keyserver]
    #[arg(short, long)]
    pub(crate) datadir: Option<PathBuf>,

    /// Use the specified config file, relative to the data directory
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
}

#[derive(Debug, Parser, Command, Runnable)]
pub(crate) enum KeyServerCmd {
    /// Run the keyserver's background maintenance until interrupted.
    Start(StartCmd),

    /// Delete expired encryption keys and diagnosis keys once, then exit.
    Purge(PurgeCmd),

    /// Show the pairings registered under a device hash.
    Pairings(PairingsCmd),

    /// Generate an example config file.
    ExampleConfig(ExampleConfigCmd),
}

/// `start` subcommand
#[derive(Debug, Parser, Command)]
pub(crate) struct StartCmd {}

/// `purge` subcommand
#[derive(Debug, Parser, Command)]
pub(crate) struct PurgeCmd {}

/// `pairings` subcommand
#[derive(Debug, Parser, Command)]
pub(crate) struct PairingsCmd {
    /// The device hash to look up.
    pub(crate) hash_id: String,
}

/// `example-config` subcommand
#[derive(Debug, Parser, Command)]
pub(crate) struct ExampleConfigCmd {
    /// Where to write the example config file, or `-` for stdout.
    #[arg(short, long, default_value = "-")]
    pub(crate) output: String,

    /// Overwrite the output file if it already exists.
    #[arg(long)]
    pub(crate) force: bool,
}
