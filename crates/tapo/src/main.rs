mod cli;
mod handlers;

use clap::Parser;

use cli::{Cli, Command};
use handlers::{handle_discover, handle_plug};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    match cli.command {
        Command::Version => {
            println!("tapo {}", env!("CARGO_PKG_VERSION"));
            println!("tapo-core {}", tapo_core::VERSION);
        }

        Command::Discover { timeout } => {
            handle_discover(timeout).await;
        }

        Command::Plug {
            target,
            port,
            timeout,
            retries_on_forbidden,
            retries_on_communication_error,
            command,
        } => {
            handle_plug(
                target,
                port,
                timeout,
                retries_on_forbidden,
                retries_on_communication_error,
                command,
                cli.username,
                cli.password_stdin,
            )
            .await;
        }
    }
}
