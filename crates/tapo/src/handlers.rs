use std::io::IsTerminal;
use std::time::Duration;

use tapo_core::{Credentials, Plug, discovery};
use tracing::{debug, error};

use crate::cli::PlugCommand;

/// Handle the discover command.
pub async fn handle_discover(window: Duration) {
    let options = discovery::DiscoverOptions::default().with_window(window);
    match discovery::discover_with(options).await {
        Ok(found) => {
            debug!(device_count = found.devices.len(), "discovered devices");
            for (device_id, reply) in &found.devices {
                let result = &reply.result;
                println!(
                    "{} model={} ip={} mac={} encrypt={}",
                    device_id,
                    result.device_model,
                    result.ip,
                    result.mac_address(),
                    result.mgt_encrypt_schm.encrypt_type,
                );
            }
            for reply in &found.errors {
                eprintln!(
                    "error reply from {}: {}",
                    reply.result.device_id,
                    reply.result.status()
                );
            }
        }
        Err(e) => {
            error!(error = %e, "discovery failed");
            eprintln!("Error: discovery failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle a single-plug command.
#[allow(clippy::too_many_arguments)]
pub async fn handle_plug(
    target: String,
    port: u16,
    timeout: Duration,
    retries_on_forbidden: u32,
    retries_on_communication_error: u32,
    command: PlugCommand,
    username: Option<String>,
    password_stdin: bool,
) {
    let credentials = match get_credentials(username, password_stdin) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut plug = Plug::new(target)
        .with_port(port)
        .with_timeout(timeout)
        .with_retries_on_forbidden(retries_on_forbidden)
        .with_retries_on_communication_error(retries_on_communication_error);

    if let Err(e) = plug.handshake(credentials).await {
        error!(host = %plug.host(), error = %e, "handshake failed");
        eprintln!("Error: handshake with {} failed: {}", plug.host(), e);
        std::process::exit(1);
    }
    debug!(transport = plug.transport().unwrap_or("?"), "connected");

    if let Err(e) = run_command(&mut plug, command).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(plug: &mut Plug, command: PlugCommand) -> Result<(), tapo_core::Error> {
    match command {
        PlugCommand::On => {
            plug.on().await?;
            println!("on");
        }
        PlugCommand::Off => {
            plug.off().await?;
            println!("off");
        }
        PlugCommand::IsOn => println!("{}", plug.is_on().await?),
        PlugCommand::Info => print_json(&plug.get_device_info().await?),
        PlugCommand::Usage => print_json(&plug.get_device_usage().await?),
        PlugCommand::Energy => print_json(&plug.get_energy_usage().await?),
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to render JSON: {}", e),
    }
}

/// Read the password based on the provided options.
///
/// Priority: the TAPO_PASSWORD environment variable, then stdin (if
/// `--password-stdin`), then an interactive prompt.
fn read_password(password_stdin: bool, prompt: &str) -> Result<String, String> {
    if password_stdin {
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| format!("failed to read password from stdin: {}", e))?;
        return Ok(input.trim().to_string());
    }

    if std::io::stdin().is_terminal() {
        eprint!("{}: ", prompt);
        rpassword::read_password().map_err(|e| format!("failed to read password: {}", e))
    } else {
        Err("no password provided; use --password-stdin when piping input".to_string())
    }
}

/// Get credentials from CLI options and environment.
fn get_credentials(username: Option<String>, password_stdin: bool) -> Result<Credentials, String> {
    let Some(user) = username else {
        return Err("no username provided; use --username or TAPO_USERNAME".to_string());
    };

    if let Ok(pass) = std::env::var("TAPO_PASSWORD") {
        return Ok(Credentials::new(user, pass));
    }

    let prompt = format!("Password for {}", user);
    let pass = read_password(password_stdin, &prompt)?;
    Ok(Credentials::new(user, pass))
}
