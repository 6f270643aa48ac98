//! Idle-gated delivery of content diffs.
//!
//! Diffs emitted while the user is interacting are held back and delivered
//! as one combined emission once the user has been idle for the configured
//! timeout. All dispatcher state lives in one task; handles only send it
//! commands.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use super::compute::ContentDiff;

/// Default quiet period after the last interaction.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Emissions buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 64;

enum Command {
    Emit(Vec<ContentDiff>),
    Interaction,
}

/// Handle to the dispatcher task.
///
/// Cheap to clone. The task stops once every handle is dropped.
#[derive(Clone)]
pub struct DiffDispatcher {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<Vec<ContentDiff>>,
}

impl DiffDispatcher {
    /// Start the dispatcher task on the current runtime.
    pub fn spawn(idle_timeout: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);

        tokio::spawn(run(rx, events.clone(), idle_timeout));
        Self { commands, events }
    }

    /// Deliver diffs now if the user is idle, otherwise queue them.
    pub fn emit_diffs(&self, diffs: Vec<ContentDiff>) {
        if diffs.is_empty() {
            return;
        }
        if self.commands.send(Command::Emit(diffs)).is_err() {
            tracing::debug!("Diff dispatcher stopped, dropping diffs");
        }
    }

    /// Mark the user as active and restart the idle timer.
    pub fn on_user_interaction(&self) {
        if self.commands.send(Command::Interaction).is_err() {
            tracing::debug!("Diff dispatcher stopped, ignoring interaction");
        }
    }

    /// Receive future emissions. Nothing emitted earlier is replayed, and a
    /// receiver that falls behind skips the emissions it missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ContentDiff>> {
        self.events.subscribe()
    }
}

fn publish(events: &broadcast::Sender<Vec<ContentDiff>>, diffs: Vec<ContentDiff>) {
    let count = diffs.len();
    match events.send(diffs) {
        Ok(receivers) => tracing::trace!(diffs = count, receivers, "Published content diffs"),
        Err(_) => tracing::trace!(diffs = count, "No diff subscribers"),
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<Vec<ContentDiff>>,
    idle_timeout: Duration,
) {
    let mut idle = true;
    let mut pending: Vec<ContentDiff> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        // The sleep future is built even while disabled, hence the fallback.
        let wake_at = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Emit(diffs)) => {
                    if idle {
                        publish(&events, diffs);
                    } else {
                        pending.extend(diffs);
                    }
                }
                Some(Command::Interaction) => {
                    idle = false;
                    deadline = Some(Instant::now() + idle_timeout);
                }
                None => break,
            },
            _ = sleep_until(wake_at), if deadline.is_some() => {
                idle = true;
                deadline = None;
                if !pending.is_empty() {
                    tracing::debug!(diffs = pending.len(), "User idle, flushing queued diffs");
                    publish(&events, std::mem::take(&mut pending));
                }
            }
        }
    }

    tracing::debug!(dropped = pending.len(), "Diff dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ContentType;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    fn added(group: &str) -> ContentDiff {
        ContentDiff::GroupAdded {
            content_type: ContentType::Live,
            group: group.to_string(),
        }
    }

    /// Let the dispatcher task drain its queue.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_emission_never_notifies() {
        let dispatcher = DiffDispatcher::spawn(DEFAULT_IDLE_TIMEOUT);
        let mut rx = dispatcher.subscribe();

        dispatcher.emit_diffs(Vec::new());
        settle().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_emission_is_immediate() {
        let dispatcher = DiffDispatcher::spawn(DEFAULT_IDLE_TIMEOUT);
        let mut rx = dispatcher.subscribe();

        dispatcher.emit_diffs(vec![added("EN")]);
        settle().await;
        assert_eq!(rx.try_recv().unwrap(), vec![added("EN")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emissions_during_interaction_are_batched() {
        let dispatcher = DiffDispatcher::spawn(DEFAULT_IDLE_TIMEOUT);
        let mut rx = dispatcher.subscribe();

        dispatcher.on_user_interaction();
        dispatcher.emit_diffs(vec![added("A")]);
        dispatcher.emit_diffs(vec![added("B"), added("C")]);
        dispatcher.emit_diffs(vec![added("D")]);
        settle().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            vec![added("A"), added("B"), added("C"), added("D")]
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_restarts_idle_timer() {
        let dispatcher = DiffDispatcher::spawn(Duration::from_secs(3));
        let mut rx = dispatcher.subscribe();

        dispatcher.on_user_interaction();
        dispatcher.emit_diffs(vec![added("A")]);
        tokio::time::sleep(Duration::from_secs(2)).await;

        dispatcher.on_user_interaction();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), vec![added("A")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_again_after_flush() {
        let dispatcher = DiffDispatcher::spawn(Duration::from_millis(100));
        let mut rx = dispatcher.subscribe();

        dispatcher.on_user_interaction();
        tokio::time::sleep(Duration::from_millis(200)).await;

        dispatcher.emit_diffs(vec![added("late")]);
        settle().await;
        assert_eq!(rx.try_recv().unwrap(), vec![added("late")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_no_replay() {
        let dispatcher = DiffDispatcher::spawn(DEFAULT_IDLE_TIMEOUT);
        let _early = dispatcher.subscribe();

        dispatcher.emit_diffs(vec![added("EN")]);
        settle().await;

        let mut late = dispatcher.subscribe();
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_handle_outliving_its_task_is_harmless() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dispatcher = runtime.block_on(async { DiffDispatcher::spawn(DEFAULT_IDLE_TIMEOUT) });
        drop(runtime);

        let mut rx = dispatcher.subscribe();
        dispatcher.on_user_interaction();
        dispatcher.emit_diffs(vec![added("EN")]);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
