mod cli;
mod core;
mod terminal;
#[cfg(test)]
mod test_fixtures;

use clap::Parser;
use cli::Cli;
use log::error;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(e) = cli::handle_download(&cli).await {
        error!("chatlog failed: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
