mod cli;
mod commands;
mod error;
mod util;

use clap::Parser;

use cli::{Cli, Commands};

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_from(wild::args_os());

    match cli.command {
        Commands::List(args) => commands::list(args)?,
        Commands::Extract(args) => commands::extract(args)?,
        Commands::Test(args) => commands::test(args)?,
        Commands::Info(args) => commands::info(args)?,
    };

    Ok(())
}
