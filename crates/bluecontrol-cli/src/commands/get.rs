//! Get command implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bluecontrol_core::{EventReceiver, ParameterName, ParameterTarget, SessionEvent};
use tokio::sync::broadcast::error::RecvError;

use super::DeviceOptions;
use crate::util::{open_session, write_output};

pub async fn cmd_get(opts: &DeviceOptions<'_>, target: &str) -> Result<()> {
    let target: ParameterTarget = target.parse()?;
    let params: Vec<ParameterName> = match target {
        ParameterTarget::One(param) => vec![param],
        ParameterTarget::All => opts.session.dialect.parameters().to_vec(),
    };

    let session = open_session(opts.session.clone()).await?;
    session.connect_ready(&opts.address, opts.timeout).await?;

    let mut values = BTreeMap::new();
    for param in params {
        // Subscribe before sending so the reply cannot slip past
        let mut events = session.handle.events();
        session
            .handle
            .get_value(param)
            .await
            .with_context(|| format!("Failed to request {}", param))?;
        let value = await_value(&mut events, param, opts.timeout).await?;
        values.insert(param, value);
    }
    session.close().await?;

    let content = if opts.json {
        serde_json::to_string_pretty(&values)? + "\n"
    } else {
        format_values_text(&values)
    };
    write_output(opts.output, &content)
}

/// Wait for the peripheral to report `param`.
pub(crate) async fn await_value(
    events: &mut EventReceiver,
    param: ParameterName,
    timeout: Duration,
) -> Result<String> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::ValueChanged {
                    param: changed,
                    value,
                    pending: false,
                }) if changed == param => return Ok(value),
                Ok(SessionEvent::Disconnected { reason, .. }) => {
                    bail!("Disconnected while waiting for {}: {:?}", param, reason)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} session events", skipped);
                }
                Err(RecvError::Closed) => bail!("Session closed"),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .with_context(|| format!("No reply for {} within {:?}", param, timeout))?
}

fn format_values_text(values: &BTreeMap<ParameterName, String>) -> String {
    values
        .iter()
        .map(|(param, value)| format!("{}: {}\n", param, value))
        .collect()
}
