//! Vigil CLI tools: permission scan, session simulation.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

use vigil_audit::{scan, ClassifierOptions, SnapshotSource};
use vigil_common::{
    fields, FileEndpoint, MonitorConfig, RiskRule, ACTIVE_CAMERAS, FIELD_EMAIL, FIELD_FILE_URL,
};
use vigil_signal::{
    AppCredential, CommandChannel, DirectoryDiff, LoopbackFactory, LoopbackProbe, MemoryStore,
    Navigator, PeerId, RtcEngineFactory, SessionController, SessionDirectory, SessionObserver,
    SessionState, SignalingStore,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Vigil CLI tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify custom permissions from a package snapshot
    Scan {
        /// JSON file listing installed packages
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Risk rule (normal-only | normal-and-dangerous)
        #[arg(long)]
        rule: Option<RiskRule>,

        /// Print profiles as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a viewing session against the in-memory store and loopback engine
    Simulate {
        /// Channel the simulated device broadcasts on
        #[arg(long, default_value = "ch1")]
        channel: String,

        /// Owner the device publishes
        #[arg(long, default_value = "a@x.com")]
        owner: String,

        /// Remote peer id that attaches to the channel
        #[arg(long, default_value_t = 42)]
        peer: PeerId,

        /// File endpoint the device publishes once live
        #[arg(long)]
        file_url: Option<String>,

        /// Engine credential
        #[arg(long, env = "VIGIL_RTC_APP_ID", hide_env_values = true)]
        app_id: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    vigil_common::init_tracing();

    run(Args::parse(), MonitorConfig::from_env)
}

/// Configuration is loaded only by the commands that read it.
fn run(
    args: Args,
    load_config: impl Fn() -> vigil_common::Result<MonitorConfig>,
) -> Result<()> {
    match args.command {
        Command::Scan {
            snapshot,
            rule,
            json,
        } => {
            let config = load_config()?;
            let mut options = ClassifierOptions::from(&config);
            if let Some(rule) = rule {
                options.risk_rule = rule;
            }

            let outcome = scan(&SnapshotSource::new(&snapshot), &options);
            if let Some(err) = outcome.error {
                return Err(anyhow!(err).context(format!("scanning {}", snapshot.display())));
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.profiles)?);
            } else if outcome.profiles.is_empty() {
                println!("No applications declare custom permissions");
            } else {
                println!("Risk rule: {}", options.risk_rule);
                for profile in &outcome.profiles {
                    println!(
                        "{} ({}): {} risky",
                        profile.app_label,
                        profile.package_id,
                        profile.risk_count()
                    );
                    for permission in &profile.declared_custom_permissions {
                        let marker = if permission.is_risk { "!" } else { " " };
                        println!(
                            "  {} {} [{}]",
                            marker, permission.name, permission.protection
                        );
                    }
                }
            }
        }
        Command::Simulate {
            channel,
            owner,
            peer,
            file_url,
            app_id,
        } => {
            let app_id = match app_id {
                Some(id) => id,
                None => load_config()?.require_app_id()?.to_string(),
            };
            let credential = AppCredential::new(app_id)?;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(simulate(credential, channel, owner, peer, file_url))?;
        }
        Command::Version => {
            println!("vigil {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Prints session progress and forwards endpoint updates.
struct ConsoleObserver {
    endpoints: mpsc::UnboundedSender<Option<FileEndpoint>>,
}

impl SessionObserver for ConsoleObserver {
    fn on_state_changed(&self, state: SessionState) {
        println!("  session: {}", state);
    }

    fn on_file_endpoint(&self, endpoint: Option<&FileEndpoint>) {
        match endpoint {
            Some(endpoint) => println!("  file endpoint: {}", endpoint),
            None => println!("  file endpoint: not published"),
        }
        let _ = self.endpoints.send(endpoint.cloned());
    }

    fn on_peer_left(&self, peer: PeerId) {
        println!("  peer {} left", peer);
    }

    fn on_error(&self, error: &vigil_common::Error) {
        eprintln!("  session error: {}", error);
    }
}

async fn simulate(
    credential: AppCredential,
    channel: String,
    owner: String,
    peer: PeerId,
    file_url: Option<String>,
) -> Result<()> {
    let store = MemoryStore::new();
    let shared: Arc<dyn SignalingStore> = Arc::new(store.clone());
    let probe = LoopbackProbe::new();
    let factory = LoopbackFactory::new(probe.clone());
    let mut nav = Navigator::new();

    store.put_now(ACTIVE_CAMERAS, &channel, fields! { FIELD_EMAIL => owner.as_str() })?;

    let directory = SessionDirectory::new(shared.clone());
    let mut feed = directory.subscribe(|e| eprintln!("directory error: {}", e))?;
    let listing = timeout(STEP_TIMEOUT, feed.wait_for(|items| !items.is_empty()))
        .await
        .context("waiting for directory")??;
    println!("Broadcasting devices:");
    for entry in &listing {
        println!("  {} ({})", entry.channel_id, entry.owner_label);
    }

    nav.select_device(&channel)?;
    info!(screen = %nav.current(), "device selected");

    let (endpoints_tx, mut endpoints) = mpsc::unbounded_channel();
    let observer = Arc::new(ConsoleObserver {
        endpoints: endpoints_tx,
    });
    let commands = CommandChannel::new(shared.clone());
    let mut controller = SessionController::open(
        channel.clone(),
        shared.clone(),
        factory.create(&credential)?,
        commands.clone(),
        observer,
    )?;

    timeout(STEP_TIMEOUT, controller.wait_for(|s| *s == SessionState::Joining))
        .await
        .context("waiting for join")?;
    probe.remote_joined(peer);
    let state = timeout(
        STEP_TIMEOUT,
        controller.wait_for(|s| matches!(s, SessionState::Live { .. }) || s.is_closed()),
    )
    .await
    .context("waiting for remote peer")?;
    if state.is_closed() {
        return Err(anyhow!("session closed before going live"));
    }

    if let Some(url) = file_url {
        store.put_now(
            ACTIVE_CAMERAS,
            &channel,
            fields! { FIELD_EMAIL => owner.as_str(), FIELD_FILE_URL => url.as_str() },
        )?;
        let expected = FileEndpoint::parse(&url);
        while let Some(delivered) = timeout(STEP_TIMEOUT, endpoints.recv())
            .await
            .context("waiting for file endpoint")?
        {
            if delivered == expected {
                break;
            }
        }
    }

    controller.switch_camera().await?;
    if let Some(command) = commands.pending(&channel).await? {
        println!("Pending command for {}: {}", command.target_channel_id, command.action);
    }

    nav.back();
    let released = controller.leave().await;

    // Device stops broadcasting once the viewer is gone
    store.delete_now(ACTIVE_CAMERAS, &channel)?;
    let remaining = timeout(
        STEP_TIMEOUT,
        feed.wait_for(|items| items.iter().all(|e| e.channel_id != channel)),
    )
    .await
    .context("waiting for device to go offline")??;
    let diff = DirectoryDiff::between(&listing, &remaining);
    for entry in &diff.left {
        println!(
            "Device {} ({}) stopped broadcasting",
            entry.channel_id, entry.owner_label
        );
    }
    feed.unsubscribe();
    println!(
        "Session {} on {}: engine left {}x, released {}x",
        controller.state(),
        controller.channel_id(),
        probe.leave_calls(),
        probe.destroy_calls()
    );
    released?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::config::ENV_RISK_RULE;

    fn bad_rule() -> vigil_common::Result<MonitorConfig> {
        MonitorConfig::from_lookup(|key| (key == ENV_RISK_RULE).then(|| "paranoid".to_string()))
    }

    #[test]
    fn test_version_ignores_bad_config() {
        assert!(run(Args::parse_from(["vigil", "version"]), bad_rule).is_ok());
    }

    #[test]
    fn test_scan_reports_bad_config() {
        let args = Args::parse_from(["vigil", "scan", "--snapshot", "/nonexistent/packages.json"]);
        let err = run(args, bad_rule).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<vigil_common::Error>(),
            Some(vigil_common::Error::Config(_))
        ));
    }

    #[test]
    fn test_simulate_reports_directory_changes() {
        let args = Args::parse_from(["vigil", "simulate", "--app-id", "test-app"]);
        assert!(run(args, bad_rule).is_ok());
    }
}
