//! Async runtime for a [`SessionTracker`]: a one-second clock, an input
//! channel, and fire-and-forget delivery of the commands it produces.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::client::{send_command, IngestClient};
use crate::machine::{SessionTracker, TrackerCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerInput {
    Navigate(String),
    Teardown,
    Unload,
}

/// Sending side of a tracker's input channel. Dropping every handle counts
/// as a teardown.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<TrackerInput>,
}

impl TrackerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrackerInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the tracker has stopped.
    pub fn navigate(&self, route: impl Into<String>) -> bool {
        self.tx.send(TrackerInput::Navigate(route.into())).is_ok()
    }

    pub fn teardown(&self) -> bool {
        self.tx.send(TrackerInput::Teardown).is_ok()
    }

    pub fn unload(&self) -> bool {
        self.tx.send(TrackerInput::Unload).is_ok()
    }
}

/// Drive `tracker` until it is torn down or unloaded.
///
/// Each batch of commands is sent in order on its own task, so a slow
/// ingestion call never delays the clock. Returns the handle of the final
/// flush, if one was sent; awaiting it is optional.
pub async fn run_tracker(
    mut tracker: SessionTracker,
    client: Arc<dyn IngestClient>,
    mut inputs: mpsc::UnboundedReceiver<TrackerInput>,
) -> Option<JoinHandle<()>> {
    let period = tracker.config().tick;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                dispatch(&client, tracker.tick());
            }
            input = inputs.recv() => {
                let commands = match input {
                    Some(TrackerInput::Navigate(route)) => tracker.navigate(&route),
                    Some(TrackerInput::Unload) => tracker.unload(),
                    Some(TrackerInput::Teardown) | None => tracker.teardown(),
                };
                // A new visit counts from zero; its first second is a full period.
                if commands.iter().any(|c| matches!(c, TrackerCommand::Begin(_))) {
                    ticker.reset();
                }
                let flush = dispatch(&client, commands);
                if tracker.is_finished() {
                    return flush;
                }
            }
        }
    }
}

fn dispatch(client: &Arc<dyn IngestClient>, commands: Vec<TrackerCommand>) -> Option<JoinHandle<()>> {
    if commands.is_empty() {
        return None;
    }
    let client = Arc::clone(client);
    Some(tokio::spawn(async move {
        for command in &commands {
            match send_command(client.as_ref(), command).await {
                Ok(ack) if !ack.ok => debug!(?command, "ingestion rejected command"),
                Ok(_) => {}
                Err(e) => debug!(?command, error = %e, "ingestion call failed"),
            }
        }
    }))
}
