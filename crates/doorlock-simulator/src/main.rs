//! Desktop simulator for the doorlock lock and reader nodes.
//!
//! Runs the same `doorlock-core` logic the firmware runs, either against
//! scripted scenarios on an in-process network or over real TCP.
//!
//! # Commands
//!
//! | Command    | What it does                                              |
//! |------------|-----------------------------------------------------------|
//! | `scenario` | Replay scripted badge/camera timelines and check outcomes |
//! | `serve`    | Run a lock node `/unlock` endpoint on a host socket       |
//! | `present`  | Submit one tag to a running backend, trigger a peer       |
//!
//! Set `RUST_LOG=debug` to see wire-level detail.

mod loopback;
mod scenario;
mod tcp;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use doorlock_core::authorization::AuthorizationResult;
use doorlock_core::authorizer::{Authorizer, HttpAuthorizer};
use doorlock_core::config::{
    AuthorizerConfig, DEFAULT_AUTHORIZER_PORT, DEFAULT_HOLD_MS, DEFAULT_POLL_INTERVAL_MS,
    NodeConfig, PeerConfig,
};
use doorlock_core::evidence::{Evidence, TagUid};
use doorlock_core::gate::ActuatorGate;
use doorlock_core::peer::PeerTrigger;
use embassy_futures::block_on;
use embassy_time::{Delay, Duration};
use log::{error, info, warn};

use crate::loopback::LoggingActuator;
use crate::scenario::Scenario;
use crate::tcp::TcpTransport;

#[derive(Parser)]
#[command(name = "doorlock-simulator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay scripted scenarios on a simulated clock
    Scenario {
        #[arg(value_enum, default_value_t = Scenario::All)]
        which: Scenario,
    },
    /// Serve a lock node's /unlock and /status endpoints
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,
        /// Unlock hold window in milliseconds
        #[arg(long, default_value_t = DEFAULT_HOLD_MS)]
        hold_ms: u32,
    },
    /// Present one RFID tag to a running backend
    Present(PresentArgs),
}

#[derive(Args)]
struct PresentArgs {
    /// Tag UID as colon-separated hex, e.g. DE:AD:BE:EF
    uid: String,
    /// JSON node config; replaces the connection flags below
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = DEFAULT_AUTHORIZER_PORT)]
    port: u16,
    #[arg(long, env = "DOORLOCK_API_KEY", default_value = "")]
    api_key: String,
    /// Lock node to trigger on a grant, as host:port
    #[arg(long)]
    peer: Option<String>,
}

fn parse_uid(text: &str) -> Option<TagUid> {
    let bytes = text
        .split(':')
        .map(|byte| u8::from_str_radix(byte, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    TagUid::new(&bytes).ok()
}

fn parse_peer(text: &str) -> Option<PeerConfig<'_>> {
    let (host, port) = text.rsplit_once(':')?;
    let mut peer = PeerConfig::new(host);
    peer.port = port.parse().ok()?;
    Some(peer)
}

fn present(args: &PresentArgs) -> Result<(), String> {
    let uid = parse_uid(&args.uid).ok_or_else(|| format!("not a tag UID: {}", args.uid))?;

    let raw_config = match &args.config {
        Some(path) => Some(fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?),
        None => None,
    };
    let (authorizer, peer) = match &raw_config {
        Some(raw) => {
            let config = NodeConfig::from_json(raw).map_err(|e| format!("bad config: {:?}", e))?;
            (config.authorizer, config.peer)
        }
        None => {
            let mut authorizer = AuthorizerConfig::new(&args.host, &args.api_key);
            authorizer.port = args.port;
            let peer = match &args.peer {
                Some(text) => Some(parse_peer(text).ok_or_else(|| format!("bad peer: {}", text))?),
                None => None,
            };
            (authorizer, peer)
        }
    };

    let mut client = HttpAuthorizer::new(TcpTransport, Delay, authorizer);
    match block_on(client.health()) {
        Ok(health) => info!("Backend knows {} faces", health.known),
        Err(e) => warn!("Health check failed: {}", e),
    }

    let decision = block_on(client.authorize(&Evidence::Tag(uid)));
    info!("Decision: {:?}", decision);
    if decision.result != AuthorizationResult::Granted {
        return Ok(());
    }

    match peer {
        Some(peer) => {
            let mut trigger = PeerTrigger::new(TcpTransport, Delay, peer);
            block_on(trigger.trigger_unlock()).map_err(|e| e.to_string())?;
        }
        None => info!("No peer configured, nothing to unlock"),
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Scenario { which } => {
            let mut failed = 0;
            for scenario in which.each() {
                if let Err(mismatch) = scenario::run(scenario) {
                    error!("{}", mismatch);
                    failed += 1;
                }
            }
            if failed > 0 {
                error!("{} scenario(s) failed", failed);
                return ExitCode::FAILURE;
            }
        }
        Command::Serve { listen, hold_ms } => {
            let mut gate = ActuatorGate::new(
                LoggingActuator::new("relay"),
                Duration::from_millis(hold_ms as u64),
            );
            if let Err(e) = gate.engage() {
                error!("Failed to engage lock: {}", e);
                return ExitCode::FAILURE;
            }
            let poll = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS as u64);
            if let Err(e) = tcp::serve_lock(&listen, &mut gate, poll) {
                error!("Server stopped: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Command::Present(args) => {
            if let Err(e) = present(&args) {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_plays_out_as_scripted() {
        for scenario in Scenario::All.each() {
            if let Err(mismatch) = scenario::run(scenario) {
                panic!("{}", mismatch);
            }
        }
    }

    #[test]
    fn parses_uid_text() {
        let uid = parse_uid("de:ad:be:ef").unwrap();
        assert_eq!(uid.as_bytes(), [0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_uid("DE:AD:BE").is_none());
        assert!(parse_uid("zz:00:00:00").is_none());
    }

    #[test]
    fn parses_peer_address() {
        let peer = parse_peer("192.168.4.20:80").unwrap();
        assert_eq!(peer.host, "192.168.4.20");
        assert_eq!(peer.port, 80);
        assert!(parse_peer("no-port").is_none());
    }
}
