//! Set command implementation.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use bluecontrol_core::{EventReceiver, ParameterName, SessionEvent};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::DeviceOptions;
use crate::util::{open_session, write_output};

#[derive(Debug, Serialize)]
struct SetOutcome<'a> {
    param: ParameterName,
    requested: &'a str,
    confirmed: String,
}

pub async fn cmd_set(opts: &DeviceOptions<'_>, target: &str, value: &str) -> Result<()> {
    let param: ParameterName = match target.parse() {
        Ok(param) => param,
        Err(_) if target.trim().eq_ignore_ascii_case("all") => {
            bail!("Cannot SET all parameters at once; name a single parameter")
        }
        Err(e) => return Err(e.into()),
    };

    let session = open_session(opts.session.clone()).await?;
    session.connect_ready(&opts.address, opts.timeout).await?;

    // Subscribe before sending so the outcome cannot slip past
    let mut events = session.handle.events();
    session
        .handle
        .set_value(param, value)
        .await
        .with_context(|| format!("Failed to set {}", param))?;
    let confirmed = await_confirmation(&mut events, param, opts.timeout).await;
    session.close().await?;

    let confirmed = confirmed?;
    let outcome = SetOutcome {
        param,
        requested: value.trim(),
        confirmed,
    };

    if !opts.json && outcome.confirmed != outcome.requested && !opts.quiet {
        eprintln!(
            "Warning: requested {} but the device reports {}",
            outcome.requested, outcome.confirmed
        );
    }
    let content = if opts.json {
        serde_json::to_string_pretty(&outcome)? + "\n"
    } else {
        format!("{}: {}\n", outcome.param, outcome.confirmed)
    };
    write_output(opts.output, &content)
}

/// Wait for the peripheral to report `param` after a SET, failing if the
/// write is reported as failed.
async fn await_confirmation(
    events: &mut EventReceiver,
    param: ParameterName,
    timeout: Duration,
) -> Result<String> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::WriteCompleted {
                    param: Some(written),
                    success: false,
                }) if written == param => {
                    bail!("Device rejected the write for {}; value rolled back", param)
                }
                Ok(SessionEvent::ValueChanged {
                    param: changed,
                    value,
                    pending: false,
                }) if changed == param => return Ok(value),
                Ok(SessionEvent::Disconnected { reason, .. }) => {
                    bail!("Disconnected before {} was confirmed: {:?}", param, reason)
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
        .with_context(|| format!("{} was not confirmed by the device", param))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluecontrol_core::EventDispatcher;

    fn changed(value: &str, pending: bool) -> SessionEvent {
        SessionEvent::ValueChanged {
            param: ParameterName::Voltage,
            value: value.to_string(),
            pending,
        }
    }

    #[tokio::test]
    async fn test_failed_write_is_not_a_confirmation() {
        let dispatcher = EventDispatcher::new(16);
        let mut events = dispatcher.subscribe();
        dispatcher.send(changed("12.5", true));
        dispatcher.send(SessionEvent::WriteCompleted {
            param: Some(ParameterName::Voltage),
            success: false,
        });
        dispatcher.send(changed("10", false));

        let err = await_confirmation(&mut events, ParameterName::Voltage, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rolled back"));
    }

    #[tokio::test]
    async fn test_confirmed_by_notification() {
        let dispatcher = EventDispatcher::new(16);
        let mut events = dispatcher.subscribe();
        dispatcher.send(changed("12.5", true));
        dispatcher.send(SessionEvent::WriteCompleted {
            param: None,
            success: false,
        });
        dispatcher.send(SessionEvent::WriteCompleted {
            param: Some(ParameterName::Voltage),
            success: true,
        });
        dispatcher.send(changed("12.4", false));

        let value = await_confirmation(&mut events, ParameterName::Voltage, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, "12.4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_write_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let mut events = dispatcher.subscribe();
        dispatcher.send(changed("12.5", true));

        let err = await_confirmation(&mut events, ParameterName::Voltage, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("was not confirmed"));
    }
}
