//! Command implementations.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use trilink_core::config::Config;
use trilink_core::identity::{AccountIdentity, IdentityCode};
use trilink_core::messaging::InboundContent;
use trilink_core::rendezvous::{join, RendezvousConnection, RendezvousSetup};
use trilink_core::storage::DataDir;
use trilink_core::supervisor::{HostEvent, Supervisor};

/// Format the rendezvous verification hash for verbal comparison:
/// the first 16 bytes as groups of four hex characters.
fn format_verification(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..16])
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Link this device to an existing account.
pub async fn link(config: &Config) -> Result<()> {
    let data_dir = DataDir::new(&config.data_dir);
    data_dir.ensure_layout().context("create data directory")?;
    if data_dir.identity_path().exists() {
        bail!(
            "already linked; remove {} to relink",
            data_dir.identity_path().display()
        );
    }

    let setup = RendezvousSetup::generate(&config.rendezvous_host);
    println!("Scan this on the existing device:");
    println!();
    println!("  {}", setup.join_request_uri().context("QR payload")?);
    println!();
    println!("Waiting for the existing device to connect...");

    let mut connection = RendezvousConnection::establish(&setup)
        .await
        .context("rendezvous handshake")?;

    println!();
    println!("Verify that BOTH devices show the same code:");
    println!();
    println!("  {}", format_verification(connection.verification_hash()));
    println!();

    let outcome = join::run(&mut connection, &data_dir)
        .await
        .context("device join")?;
    connection.close().await.ok();

    println!("Linked as {}.", outcome.identity);
    println!(
        "Transferred {} contacts and {} groups.",
        outcome.contact_count, outcome.group_count
    );
    Ok(())
}

/// Run the linked device until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let data_dir = DataDir::new(&config.data_dir);
    let account =
        AccountIdentity::load(&data_dir.identity_path()).context("load identity (run `link` first)")?;
    tracing::info!(identity = %account.identity, "starting linked device");

    let (supervisor, mut events) = Supervisor::start(config, account, None)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(HostEvent::MediatorReady) => tracing::info!("mediator ready"),
                Some(HostEvent::Leader) => tracing::info!("promoted to leader"),
                Some(HostEvent::CspReady { queued_messages }) => {
                    tracing::info!(queued_messages, "chat server ready");
                }
                Some(HostEvent::Inbound(message)) => {
                    match &message.content {
                        InboundContent::Text(text) => {
                            tracing::info!(from = %message.sender, %text, "message");
                        }
                        InboundContent::GroupText { group, text } => {
                            tracing::info!(
                                from = %message.sender,
                                group = %format!("{}/{}", group.creator, group.group_id),
                                %text,
                                "group message"
                            );
                        }
                        other => tracing::info!(from = %message.sender, ?other, "message"),
                    }
                }
                Some(HostEvent::Reflected(_)) => tracing::debug!("reflected envelope"),
                Some(HostEvent::Disconnected { reason }) => {
                    tracing::warn!(%reason, "disconnected");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                supervisor.shutdown();
                break;
            }
        }
    }
    Ok(())
}

/// Send one text message, waiting for leadership first.
pub async fn send(config: Config, recipient: &str, message: &str) -> Result<()> {
    let recipient = IdentityCode::parse(recipient).context("recipient identity")?;
    let data_dir = DataDir::new(&config.data_dir);
    let account =
        AccountIdentity::load(&data_dir.identity_path()).context("load identity (run `link` first)")?;

    let (supervisor, _events) = Supervisor::start(config, account, None)?;
    supervisor
        .wait_for_leader_and_csp(Duration::from_secs(60))
        .await
        .context("waiting for leadership")?;

    let engine = supervisor
        .engine()
        .context("engine not bound despite readiness")?;
    let message_id = engine.send_text(recipient, message).await?;
    println!("Sent {message_id:#018x} to {recipient}.");

    supervisor.shutdown();
    Ok(())
}

/// Show the linked identity and directory counts.
pub fn status(config: &Config) -> Result<()> {
    let data_dir = DataDir::new(&config.data_dir);
    let account = match AccountIdentity::load(&data_dir.identity_path()) {
        Ok(account) => account,
        Err(_) => {
            println!("Not linked. Run `trilink link` first.");
            return Ok(());
        }
    };

    println!("Identity:      {}", account.identity);
    println!("Server group:  {}", account.server_group);
    println!("Linked at:     {}", account.linked_at);
    println!(
        "Device id:     {}",
        account
            .device_id
            .map(|id| format!("{id:#018x}"))
            .unwrap_or_else(|| "not yet allocated".into())
    );
    println!("Contacts:      {}", data_dir.load_contacts()?.len());
    println!("Groups:        {}", data_dir.load_groups()?.len());
    Ok(())
}
