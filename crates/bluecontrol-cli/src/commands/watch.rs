//! Watch command implementation.
//!
//! Connects once and streams notifications until Ctrl-C or `--count`
//! messages. Link drops are recovered by the session's reconnect policy.

use std::fs::OpenOptions;
use std::io::{self, Write};

use anyhow::{Context, Result};
use bluecontrol_core::SessionEvent;
use tokio::sync::broadcast::error::RecvError;

use super::DeviceOptions;
use crate::util::open_session;

pub async fn cmd_watch(opts: &DeviceOptions<'_>, count: Option<usize>) -> Result<()> {
    let session = open_session(opts.session.clone()).await?;
    let mut events = session.handle.events();
    let device = session.connect_ready(&opts.address, opts.timeout).await?;
    if !opts.quiet {
        eprintln!("Watching {} (Ctrl-C to stop)", device);
    }

    let mut sink: Box<dyn Write> = match opts.output {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let mut messages = 0usize;
    loop {
        if count.is_some_and(|limit| messages >= limit) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !opts.quiet {
                    eprintln!("\nShutting down...");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if matches!(event, SessionEvent::Message { .. }) {
                        messages += 1;
                    }
                    if let Some(line) = format_event(&event, opts.json)? {
                        writeln!(sink, "{}", line)?;
                        sink.flush()?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} session events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.close().await
}

/// Render one event as an output line, or `None` for events not worth showing.
fn format_event(event: &SessionEvent, json: bool) -> Result<Option<String>> {
    let shown = matches!(
        event,
        SessionEvent::Message { .. }
            | SessionEvent::ValueChanged { .. }
            | SessionEvent::Disconnected { .. }
            | SessionEvent::ReconnectScheduled { .. }
            | SessionEvent::ReconnectExhausted { .. }
            | SessionEvent::Ready { .. }
            | SessionEvent::Error { .. }
    );
    if !shown {
        return Ok(None);
    }
    if json {
        return Ok(Some(serde_json::to_string(event)?));
    }

    let line = match event {
        SessionEvent::Message { text } => format!("<- {}", text),
        SessionEvent::ValueChanged {
            param,
            value,
            pending,
        } => {
            if *pending {
                format!("{} = {} (pending)", param, value)
            } else {
                format!("{} = {}", param, value)
            }
        }
        SessionEvent::Disconnected { device, reason } => {
            format!("Disconnected from {}: {:?}", device, reason)
        }
        SessionEvent::ReconnectScheduled {
            attempt, delay_ms, ..
        } => format!("Reconnecting in {}ms (attempt {})", delay_ms, attempt),
        SessionEvent::ReconnectExhausted { attempts, .. } => {
            format!("Giving up after {} reconnect attempts", attempts)
        }
        SessionEvent::Ready { device, .. } => format!("Ready: {}", device),
        SessionEvent::Error { error } => format!("Error: {}", error),
        _ => return Ok(None),
    };
    Ok(Some(line))
}
