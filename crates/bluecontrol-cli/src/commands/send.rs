//! Send command implementation.

use anyhow::{Context, Result, bail};
use bluecontrol_core::SessionEvent;
use tokio::sync::broadcast::error::RecvError;

use super::DeviceOptions;
use crate::util::{open_session, write_output};

pub async fn cmd_send(opts: &DeviceOptions<'_>, message: &str) -> Result<()> {
    let session = open_session(opts.session.clone()).await?;
    session.connect_ready(&opts.address, opts.timeout).await?;

    let mut events = session.handle.events();
    session
        .handle
        .write_characteristic(message)
        .await
        .context("Failed to write command")?;

    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Message { text }) => return Ok(text),
                Ok(SessionEvent::WriteCompleted { success: false, .. }) => {
                    bail!("Device rejected the write")
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("Session closed"),
            }
        }
    };
    let reply = tokio::time::timeout(opts.timeout, wait).await;
    session.close().await?;

    let text = match reply {
        Ok(result) => result?,
        Err(_) => {
            if !opts.quiet {
                eprintln!("Command sent; no reply within {:?}", opts.timeout);
            }
            return Ok(());
        }
    };

    let content = if opts.json {
        serde_json::to_string_pretty(&serde_json::json!({ "sent": message, "reply": text }))?
            + "\n"
    } else {
        format!("{}\n", text)
    };
    write_output(opts.output, &content)
}
