// ABOUTME: Pairing-code exchange for unregistered sessions.
// ABOUTME: Asks for a phone number and requests a code from the network.

use crate::session::Session;
use crate::transport::ConnectionHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Source of the phone number to pair with. The interactive UI around pairing
/// belongs to the operator; the agent only needs a number.
#[async_trait]
pub trait PairingPrompt: Send + Sync {
    async fn phone_number(&self) -> Result<String>;
}

/// Reads the phone number from stdin.
pub struct StdinPrompt;

#[async_trait]
impl PairingPrompt for StdinPrompt {
    async fn phone_number(&self) -> Result<String> {
        println!("Enter the phone number to pair, country code first (e.g. 628xxxxxxxx):");
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        reader
            .read_line(&mut line)
            .await
            .context("Failed to read phone number from stdin")?;
        let number = line.trim();
        if number.is_empty() {
            anyhow::bail!("Phone number must not be empty");
        }
        Ok(number.to_string())
    }
}

/// Uses a pre-configured phone number.
pub struct FixedNumber(pub String);

#[async_trait]
impl PairingPrompt for FixedNumber {
    async fn phone_number(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Run the pairing exchange if the session is unregistered. Blocks the
/// connection cycle until a code has been issued; a failed code request is
/// retried with a fresh prompt. Prompt failures propagate to the caller,
/// which classifies them like any other establishment failure.
pub async fn ensure_registered(
    handle: &dyn ConnectionHandle,
    session: &Session,
    prompt: &dyn PairingPrompt,
) -> Result<()> {
    if session.registered {
        return Ok(());
    }

    tracing::info!("Session unregistered, starting pairing exchange");
    loop {
        let number = prompt.phone_number().await?;
        match handle.request_pairing_code(&number).await {
            Ok(code) => {
                tracing::info!(code = %code, "Pairing code issued, enter it on the paired device");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "Pairing code request failed, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
