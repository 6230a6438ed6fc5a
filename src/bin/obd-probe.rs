//! obd-probe
//!
//! Small probe for TCP-attached adapters: opens a session, sends each
//! command with a carriage return appended and prints the decoded
//! response.

use anyhow::Context;
use clap::Parser;
use std::time::Duration;

use obd_connect::{ConnectConfig, ConnectManager, Endpoint};

#[derive(Parser, Debug)]
#[command(name = "obd-probe", about = "Probe an OBD adapter over TCP")]
struct Args {
    /// Adapter endpoint, e.g. 192.168.0.10:35000
    endpoint: String,

    /// Commands to send, in order
    #[arg(default_values_t = vec!["ATZ".to_string(), "0100".to_string()])]
    commands: Vec<String>,

    /// Per-operation timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConnectConfig::load_or_default(None);
    let _guard = obd_connect::logging::init_logging(&config.log)?;

    let timeout = Duration::from_secs(args.timeout);
    let mut manager = ConnectManager::new();
    manager.init_tcp(config.stream.clone());
    manager
        .connect(Endpoint::Name(args.endpoint.clone()))
        .await
        .with_context(|| format!("connecting to {}", args.endpoint))?;

    for command in &args.commands {
        let framed = format!("{command}\r");
        manager
            .write(framed.as_bytes(), timeout)
            .await
            .with_context(|| format!("sending {command}"))?;
        match manager.read_string(timeout).await {
            Ok(Some(response)) => println!("{command}: {response}"),
            Ok(None) => println!("{command}: no data"),
            Err(e) => println!("{command}: error: {e}"),
        }
    }

    manager.close();
    Ok(())
}
