mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run(args) => {
            ruman::logger::init_logger(args.verbose);
            cli::run(args).await?
        }
    };
    std::process::exit(code);
}
