use clap::Subcommand;

use super::config::ConfigArgs;
use super::run::RunArgs;
use super::serve::ServeArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Serve the job API over HTTP
    Serve(ServeArgs),

    /// Run one job in this terminal, answering input requests interactively
    Run(RunArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}
