//! `chainpubsub account` and `chainpubsub signature`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use chainpubsub_core::AccountNotification;
use chainpubsub_ws::PubSubClient;

/// Pause before redialling after the connection drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub async fn account(client: &PubSubClient, address: &str) -> Result<()> {
    let mut sub = client
        .subscribe_account(address)
        .await
        .with_context(|| format!("subscribing to account {address}"))?;
    eprintln!("Subscribed to {address} (subscription {}). Ctrl-C to stop.", sub.handle());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = sub.recv() => match update {
                Some(Ok(update)) => print_account(&update)?,
                Some(Err(e)) if e.is_connection_error() => {
                    warn!(error = %e, "connection lost, resubscribing");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    client.connect()?;
                }
                Some(Err(e)) => warn!(error = %e, "skipping undecodable notification"),
                None => bail!("subscription to {address} was closed"),
            }
        }
    }

    sub.unsubscribe()?;
    client.disconnect().await;
    Ok(())
}

fn print_account(update: &AccountNotification) -> Result<()> {
    let slot = update
        .slot
        .map_or_else(|| "-".to_string(), |slot| slot.to_string());
    println!(
        "slot={slot} lamports={} account={}",
        update.account.lamports,
        serde_json::to_string(&update.account)?
    );
    Ok(())
}

pub async fn signature(
    client: &PubSubClient,
    signature: &str,
    timeout: Option<Duration>,
) -> Result<()> {
    let observe = client.observe_signature_confirmation(signature);
    let confirmation = match timeout {
        Some(limit) => tokio::time::timeout(limit, observe)
            .await
            .map_err(|_| anyhow!("no confirmation for {signature} within {}s", limit.as_secs()))??,
        None => observe.await?,
    };
    client.disconnect().await;

    let slot = confirmation
        .slot
        .map_or_else(|| "unknown slot".to_string(), |slot| format!("slot {slot}"));
    match &confirmation.err {
        None => {
            println!("{signature} confirmed at {slot}");
            Ok(())
        }
        Some(err) => bail!("{signature} failed at {slot}: {err}"),
    }
}
