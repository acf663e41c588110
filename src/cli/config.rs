use anyhow::Result;
use clap::Args;

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Args, Clone)]
pub struct ConfigArgs {
    /// Print the configuration file path instead of its contents
    #[arg(long)]
    pub path: bool,
}

/// Prints the effective configuration with secrets redacted.
pub fn cmd_config(args: ConfigArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    if args.path {
        match ctx.config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("(defaults; no configuration file found)"),
        }
        return Ok(());
    }
    let config = ctx.config().redacted();
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Human | OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&config)?),
    }
    Ok(())
}
