//! Periodic session auto-save.
//!
//! One task per open session runs both the periodic save and the debounced
//! save after edits. Ticks never overlap: a tick that finds the session busy
//! (locked, or mid-restore) is skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use designer_core::current_timestamp_ms;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::session::EditorSession;

/// Handle to a running auto-save task.
#[derive(Debug)]
pub struct AutosaveHandle {
    handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AutosaveHandle {
    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task. No save starts after this returns.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort as backup
        self.handle.abort();
    }
}

/// Spawn the auto-save loop for `session`.
///
/// A save runs every `interval`, the first one interval after spawning.
/// Between those, edits are saved once they have been quiet for `debounce`,
/// checked every `debounce`. The task exits on [`AutosaveHandle::shutdown`]
/// or once the session is closed.
pub fn spawn_autosave(
    session: Arc<Mutex<EditorSession>>,
    interval: Duration,
    debounce: Duration,
) -> AutosaveHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut quiet = tokio::time::interval(debounce);
        quiet.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Don't fire immediately on start
        ticker.tick().await;
        quiet.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Auto-save received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    let Ok(mut guard) = session.try_lock() else {
                        debug!("Session busy, skipping auto-save");
                        continue;
                    };
                    if guard.is_closed() {
                        info!(session_id = %guard.id(), "Session closed, auto-save stopping");
                        break;
                    }
                    if guard.autosave(current_timestamp_ms()) {
                        debug!(session_id = %guard.id(), "Session auto-saved");
                    }
                }

                _ = quiet.tick() => {
                    let Ok(mut guard) = session.try_lock() else {
                        continue;
                    };
                    if guard.is_closed() {
                        info!(session_id = %guard.id(), "Session closed, auto-save stopping");
                        break;
                    }
                    if guard.persist_if_due(current_timestamp_ms()) {
                        debug!(session_id = %guard.id(), "Edits saved after quiet period");
                    }
                }
            }
        }
    });

    AutosaveHandle {
        handle,
        shutdown_tx: Some(shutdown_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use designer_core::{
        CanvasObject, DesignerConfig, KeyValueStore, MemoryStore, SessionPersistence, ShapeKind,
    };

    /// Keeps the debounced save out of the way of interval tests.
    const NO_DEBOUNCE: Duration = Duration::from_secs(3600);

    async fn session_with_variant(store: &MemoryStore) -> Arc<Mutex<EditorSession>> {
        let mut session = EditorSession::new(DesignerConfig::default(), Arc::new(store.clone()));
        crate::testing::load_plain_variant(&mut session, "9").await;
        session.add_object(CanvasObject::shape(ShapeKind::Rect, 10.0, 10.0));
        Arc::new(Mutex::new(session))
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_after_first_interval_only() {
        let store = MemoryStore::new();
        let session = session_with_variant(&store).await;
        let key = SessionPersistence::key("9");

        let handle = spawn_autosave(Arc::clone(&session), Duration::from_secs(30), NO_DEBOUNCE);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.get(&key).expect("store").is_none());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(store.get(&key).expect("store").is_some());
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_is_skipped() {
        let store = MemoryStore::new();
        let session = session_with_variant(&store).await;
        let key = SessionPersistence::key("9");

        let handle = spawn_autosave(Arc::clone(&session), Duration::from_secs(30), NO_DEBOUNCE);
        {
            let _held = session.lock().await;
            tokio::time::sleep(Duration::from_secs(35)).await;
        }
        assert!(store.get(&key).expect("store").is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.get(&key).expect("store").is_some());
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_session_closes() {
        let store = MemoryStore::new();
        let session = session_with_variant(&store).await;

        let handle = spawn_autosave(Arc::clone(&session), Duration::from_secs(30), NO_DEBOUNCE);
        session.lock().await.close();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_saved_after_quiet_period() {
        let store = MemoryStore::new();
        let session = session_with_variant(&store).await;
        let key = SessionPersistence::key("9");

        let handle = spawn_autosave(
            Arc::clone(&session),
            Duration::from_secs(30),
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.get(&key).expect("store").is_none());

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert!(store.get(&key).expect("store").is_some());
        assert!(!session.lock().await.is_dirty());

        // A second edit is saved on its own quiet period, not the interval.
        store.remove(&key).expect("store");
        session
            .lock()
            .await
            .add_object(CanvasObject::shape(ShapeKind::Ellipse, 5.0, 5.0));
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert!(store.get(&key).expect("store").is_some());
        handle.shutdown();
    }
}
