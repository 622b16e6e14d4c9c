//! Async driver for one timer instance
//!
//! Owns the countdown state, the one-second ticker task and the lifecycle
//! listener task. Both tasks only hold a weak reference to the controller
//! and are aborted on pause, finalize and teardown. The ticker is tagged
//! with an epoch under the same lock as the state, so a ticker that lost a
//! race with cancellation never ticks.
//!
//! Finished sessions go to a single writer task that saves them in order
//! on the blocking pool; the timer never waits for the write.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::lifecycle::Visibility;
use crate::session::Session;
use crate::store::SessionStore;
use crate::timer::{StopRequest, TimerSnapshot, TimerState};

const EVENT_CAPACITY: usize = 256;

/// Notifications for whoever renders the timer
#[derive(Debug, Clone)]
pub enum TimerEvent {
    StateChanged(TimerSnapshot),
    /// A session was finalized and handed to the store
    SessionCompleted(Session),
    SessionPersisted { id: String },
    /// The store rejected the session; it is lost
    PersistFailed { id: String, error: String },
}

struct Ticker {
    epoch: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    timer: TimerState,
    ticker: Option<Ticker>,
    lifecycle: Option<JoinHandle<()>>,
    epoch: u64,
    shut_down: bool,
}

impl Shared {
    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.handle.abort();
        }
    }
}

struct Inner {
    shared: Mutex<Shared>,
    saves: mpsc::UnboundedSender<Session>,
    events: broadcast::Sender<TimerEvent>,
    tick_interval: Duration,
    runtime: Handle,
}

pub struct TimerController {
    inner: Arc<Inner>,
}

impl TimerController {
    /// Create a controller. Must be called from within a tokio runtime.
    pub fn new(timer: TimerState, store: SessionStore, tick_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let runtime = Handle::current();
        let (saves, queue) = mpsc::unbounded_channel();
        runtime.spawn(run_writer(store, queue, events.clone()));

        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    timer,
                    ticker: None,
                    lifecycle: None,
                    epoch: 0,
                    shut_down: false,
                }),
                saves,
                events,
                tick_interval,
                runtime,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.inner.lock().timer.snapshot()
    }

    /// Listen for host visibility changes until the sender goes away or the
    /// controller is torn down. Replaces any earlier subscription.
    pub fn attach_lifecycle(&self, mut changes: mpsc::Receiver<Visibility>) {
        let mut shared = self.inner.lock();
        if shared.shut_down {
            return;
        }
        if let Some(previous) = shared.lifecycle.take() {
            previous.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.runtime.spawn(async move {
            while let Some(visibility) = changes.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_visibility_change(visibility);
            }
            debug!("lifecycle listener finished");
        });
        shared.lifecycle = Some(handle);
    }

    pub fn start(&self) -> bool {
        self.inner.start()
    }

    pub fn pause(&self) -> bool {
        self.inner.pause()
    }

    /// Start/pause control. Returns whether the timer is now running.
    pub fn toggle(&self) -> bool {
        self.inner.toggle()
    }

    /// Ask to finish early. Without progress this resets immediately;
    /// otherwise the caller confirms with `confirm_stop`.
    pub fn request_stop(&self) -> StopRequest {
        self.inner.request_stop()
    }

    pub fn confirm_stop(&self) -> Option<Session> {
        self.inner.finalize(false)
    }

    pub fn finalize(&self, is_finished: bool) -> Option<Session> {
        self.inner.finalize(is_finished)
    }

    /// Deliver a visibility change directly instead of through a channel
    pub fn on_visibility_change(&self, visibility: Visibility) -> bool {
        self.inner.on_visibility_change(visibility)
    }

    /// Release the ticker and the lifecycle subscription. Progress is
    /// discarded; no session is recorded.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for TimerController {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: TimerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn start_locked(self: &Arc<Self>, shared: &mut Shared) -> bool {
        if shared.shut_down || !shared.timer.start() {
            return false;
        }
        self.spawn_ticker(shared);
        true
    }

    fn pause_locked(shared: &mut Shared) -> bool {
        if !shared.timer.pause() {
            return false;
        }
        shared.cancel_ticker();
        true
    }

    /// The ticker is cancelled before the state is finalized.
    fn finalize_locked(shared: &mut Shared, is_finished: bool) -> Option<Session> {
        shared.cancel_ticker();
        shared.timer.finalize(is_finished)
    }

    fn start(self: &Arc<Self>) -> bool {
        let snapshot = {
            let mut shared = self.lock();
            if !self.start_locked(&mut shared) {
                return false;
            }
            shared.timer.snapshot()
        };
        debug!(remaining = snapshot.remaining_secs, "timer started");
        self.emit(TimerEvent::StateChanged(snapshot));
        true
    }

    fn pause(&self) -> bool {
        let snapshot = {
            let mut shared = self.lock();
            if !Self::pause_locked(&mut shared) {
                return false;
            }
            shared.timer.snapshot()
        };
        debug!(remaining = snapshot.remaining_secs, "timer paused");
        self.emit(TimerEvent::StateChanged(snapshot));
        true
    }

    /// Pause or start, decided and applied under one lock
    fn toggle(self: &Arc<Self>) -> bool {
        let (running, snapshot) = {
            let mut shared = self.lock();
            let changed = if shared.timer.is_running() {
                Self::pause_locked(&mut shared)
            } else {
                self.start_locked(&mut shared)
            };
            if !changed {
                return shared.timer.is_running();
            }
            (shared.timer.is_running(), shared.timer.snapshot())
        };
        debug!(running, remaining = snapshot.remaining_secs, "timer toggled");
        self.emit(TimerEvent::StateChanged(snapshot));
        running
    }

    /// Progress check and reset happen under the same lock, so a tick can't
    /// slip in and turn a reset into a saved session.
    fn request_stop(&self) -> StopRequest {
        let (request, snapshot) = {
            let mut shared = self.lock();
            let request = shared.timer.request_stop();
            if request != StopRequest::Reset {
                return request;
            }
            // nothing to save without progress
            let _ = Self::finalize_locked(&mut shared, false);
            (request, shared.timer.snapshot())
        };
        self.emit(TimerEvent::StateChanged(snapshot));
        request
    }

    fn finalize(&self, is_finished: bool) -> Option<Session> {
        let (session, snapshot) = {
            let mut shared = self.lock();
            let session = Self::finalize_locked(&mut shared, is_finished);
            (session, shared.timer.snapshot())
        };
        self.emit(TimerEvent::StateChanged(snapshot));
        if let Some(session) = &session {
            self.persist(session.clone());
        }
        session
    }

    fn on_visibility_change(&self, visibility: Visibility) -> bool {
        let snapshot = {
            let mut shared = self.lock();
            if !shared.timer.on_visibility_change(visibility) {
                return false;
            }
            shared.cancel_ticker();
            shared.timer.snapshot()
        };
        info!(
            distractions = snapshot.distractions,
            visibility = visibility.as_str(),
            "left the app mid-session, timer paused"
        );
        self.emit(TimerEvent::StateChanged(snapshot));
        true
    }

    fn shutdown(&self) {
        let mut shared = self.lock();
        if shared.shut_down {
            return;
        }
        shared.shut_down = true;
        shared.cancel_ticker();
        if let Some(listener) = shared.lifecycle.take() {
            listener.abort();
        }
        shared.timer.pause();
        debug!("timer torn down");
    }

    fn spawn_ticker(self: &Arc<Self>, shared: &mut Shared) {
        shared.cancel_ticker();
        shared.epoch += 1;
        let epoch = shared.epoch;

        let weak: Weak<Inner> = Arc::downgrade(self);
        let period = self.tick_interval;
        let handle = self.runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.tick(epoch) {
                    break;
                }
            }
        });

        shared.ticker = Some(Ticker { epoch, handle });
    }

    /// One tick from the ticker tagged `epoch`. Returns whether to keep ticking.
    fn tick(&self, epoch: u64) -> bool {
        let (completed, snapshot, keep_going) = {
            let mut shared = self.lock();
            match &shared.ticker {
                Some(ticker) if ticker.epoch == epoch => {}
                _ => return false,
            }

            let completed = shared.timer.tick();
            let keep_going = shared.timer.is_running();
            if !keep_going {
                // this task is the ticker; detach rather than abort itself
                shared.ticker = None;
            }
            (completed, shared.timer.snapshot(), keep_going)
        };

        self.emit(TimerEvent::StateChanged(snapshot));
        if let Some(session) = completed {
            info!(duration = session.duration, "focus session finished");
            self.persist(session);
        }
        keep_going
    }

    fn persist(&self, session: Session) {
        self.emit(TimerEvent::SessionCompleted(session.clone()));
        if let Err(mpsc::error::SendError(session)) = self.saves.send(session) {
            error!(id = %session.id, "session writer is gone, session lost");
        }
    }
}

/// Save queued sessions one at a time, in the order they were finalized.
/// Ends once the controller and its queue are dropped.
async fn run_writer(
    store: SessionStore,
    mut queue: mpsc::UnboundedReceiver<Session>,
    events: broadcast::Sender<TimerEvent>,
) {
    while let Some(session) = queue.recv().await {
        let id = session.id.clone();
        let store = store.clone();
        let result = tokio::task::spawn_blocking(move || store.append(&session)).await;
        let event = match result {
            Ok(Ok(())) => {
                debug!(id = %id, "session persisted");
                TimerEvent::SessionPersisted { id }
            }
            Ok(Err(e)) => {
                error!(id = %id, error = %e, "failed to save session, it is lost");
                TimerEvent::PersistFailed {
                    id,
                    error: e.to_string(),
                }
            }
            Err(e) => {
                error!(id = %id, error = %e, "session save task failed");
                TimerEvent::PersistFailed {
                    id,
                    error: e.to_string(),
                }
            }
        };
        let _ = events.send(event);
    }
    debug!("session writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlobStore, StoreError};
    use crate::timer::TimerStatus;
    use std::num::NonZeroU32;
    use tokio::sync::broadcast::error::RecvError;

    fn controller(secs: u32, store: SessionStore) -> TimerController {
        let timer = TimerState::new(NonZeroU32::new(secs).unwrap(), Some("Study"));
        TimerController::new(timer, store, Duration::from_secs(1))
    }

    async fn next_matching<F>(rx: &mut broadcast::Receiver<TimerEvent>, pred: F) -> TimerEvent
    where
        F: Fn(&TimerEvent) -> bool,
    {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        time::timeout(Duration::from_secs(3600), wait)
            .await
            .expect("event not received")
    }

    fn is_persisted(event: &TimerEvent) -> bool {
        matches!(event, TimerEvent::SessionPersisted { .. })
    }

    struct FailingBlobs;

    impl BlobStore for FailingBlobs {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Write {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_completes_and_persists() {
        let store = SessionStore::in_memory();
        let timer = controller(3, store.clone());
        let mut events = timer.subscribe();

        assert!(timer.start());
        let completed = next_matching(&mut events, |e| {
            matches!(e, TimerEvent::SessionCompleted(_))
        })
        .await;
        match completed {
            TimerEvent::SessionCompleted(session) => {
                assert_eq!(session.duration, 3);
                assert!(session.is_finished);
                assert_eq!(session.category, "Study");
            }
            other => panic!("unexpected event {:?}", other),
        }

        next_matching(&mut events, is_persisted).await;
        let saved = store.get_all().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].duration, 3);
        assert_eq!(timer.snapshot().status, TimerStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_period() {
        let timer = controller(60, SessionStore::in_memory());
        timer.start();
        time::sleep(Duration::from_millis(900)).await;
        assert_eq!(timer.snapshot().remaining_secs, 60);
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(timer.snapshot().remaining_secs, 59);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_ticking() {
        let timer = controller(60, SessionStore::in_memory());
        timer.start();
        time::sleep(Duration::from_millis(2500)).await;
        assert!(timer.pause());
        time::sleep(Duration::from_secs(10)).await;

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.remaining_secs, 58);
        assert_eq!(snapshot.status, TimerStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_resumes() {
        let timer = controller(60, SessionStore::in_memory());
        assert!(timer.toggle());
        time::sleep(Duration::from_millis(1500)).await;
        assert!(!timer.toggle());
        time::sleep(Duration::from_secs(5)).await;
        assert!(timer.toggle());
        time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(timer.snapshot().remaining_secs, 57);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_counts_distraction_and_stops_ticks() {
        let store = SessionStore::in_memory();
        let timer = controller(5, store.clone());
        let (host, changes) = mpsc::channel(8);
        timer.attach_lifecycle(changes);
        let mut events = timer.subscribe();

        timer.start();
        time::sleep(Duration::from_millis(1500)).await;
        host.send(Visibility::Background).await.unwrap();
        time::sleep(Duration::from_secs(10)).await;

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.distractions, 1);
        assert_eq!(snapshot.remaining_secs, 4);
        assert_eq!(snapshot.status, TimerStatus::Paused);

        // repeated background reports are not new edges
        host.send(Visibility::Inactive).await.unwrap();
        host.send(Visibility::Active).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(timer.snapshot().distractions, 1);

        timer.start();
        let event = next_matching(&mut events, |e| {
            matches!(e, TimerEvent::SessionCompleted(_))
        })
        .await;
        if let TimerEvent::SessionCompleted(session) = event {
            assert_eq!(session.duration, 5);
            assert_eq!(session.distractions, 1);
            assert!(session.is_finished);
        }
        next_matching(&mut events, is_persisted).await;
        assert_eq!(store.get_all().unwrap()[0].distractions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_stop_records_partial_session() {
        let store = SessionStore::in_memory();
        let timer = controller(1500, store.clone());
        let mut events = timer.subscribe();

        timer.start();
        time::sleep(Duration::from_millis(5500)).await;

        match timer.request_stop() {
            StopRequest::Confirm(prompt) => assert_eq!(prompt.elapsed, 5),
            StopRequest::Reset => panic!("expected a confirmation"),
        }
        // still running until confirmed
        assert_eq!(timer.snapshot().status, TimerStatus::Running);

        let session = timer.confirm_stop().unwrap();
        assert_eq!(session.duration, 5);
        assert!(!session.is_finished);
        assert_eq!(session.distractions, 0);

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.remaining_secs, 1500);
        assert_eq!(snapshot.status, TimerStatus::Idle);

        next_matching(&mut events, is_persisted).await;
        assert_eq!(store.get_all().unwrap(), vec![session]);

        // no stray ticks after finalize
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(timer.snapshot().remaining_secs, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_fresh_timer_is_reset() {
        let store = SessionStore::in_memory();
        let timer = controller(1500, store.clone());

        assert_eq!(timer.request_stop(), StopRequest::Reset);
        assert!(timer.confirm_stop().is_none());
        time::sleep(Duration::from_secs(2)).await;

        assert_eq!(timer.snapshot().status, TimerStatus::Idle);
        assert!(store.get_all().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_right_after_start_resets() {
        let timer = controller(1500, SessionStore::in_memory());
        timer.start();
        assert_eq!(timer.request_stop(), StopRequest::Reset);
        time::sleep(Duration::from_secs(3)).await;

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.status, TimerStatus::Idle);
        assert_eq!(snapshot.remaining_secs, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_just_before_first_tick_saves_nothing() {
        let store = SessionStore::in_memory();
        let timer = controller(1500, store.clone());
        let mut events = timer.subscribe();

        timer.start();
        time::sleep(Duration::from_millis(999)).await;
        assert_eq!(timer.request_stop(), StopRequest::Reset);
        time::sleep(Duration::from_secs(5)).await;

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.status, TimerStatus::Idle);
        assert_eq!(snapshot.remaining_secs, 1500);
        assert!(store.get_all().unwrap().is_empty());
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, TimerEvent::StateChanged(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_stops_are_saved_in_order() {
        let store = SessionStore::in_memory();
        let timer = controller(1500, store.clone());
        let mut events = timer.subscribe();

        timer.start();
        time::sleep(Duration::from_millis(2500)).await;
        let first = timer.confirm_stop().unwrap();
        timer.start();
        time::sleep(Duration::from_millis(3500)).await;
        let second = timer.confirm_stop().unwrap();

        let mut persisted = Vec::new();
        for _ in 0..2 {
            if let TimerEvent::SessionPersisted { id } =
                next_matching(&mut events, is_persisted).await
            {
                persisted.push(id);
            }
        }
        assert_eq!(persisted, vec![first.id.clone(), second.id.clone()]);
        assert_eq!(store.get_all().unwrap(), vec![second, first]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_after_shutdown_stays_stopped() {
        let timer = controller(60, SessionStore::in_memory());
        timer.shutdown();
        assert!(!timer.toggle());
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(timer.snapshot().remaining_secs, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_still_resets() {
        let store = SessionStore::new(Arc::new(FailingBlobs));
        let timer = controller(2, store);
        let mut events = timer.subscribe();

        timer.start();
        let event = next_matching(&mut events, |e| {
            matches!(e, TimerEvent::PersistFailed { .. })
        })
        .await;
        if let TimerEvent::PersistFailed { error, .. } = event {
            assert!(error.contains("disk full"));
        }
        assert_eq!(timer.snapshot().status, TimerStatus::Idle);
        assert!(timer.start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything_without_saving() {
        let store = SessionStore::in_memory();
        let timer = controller(10, store.clone());
        let (host, changes) = mpsc::channel(8);
        timer.attach_lifecycle(changes);

        timer.start();
        time::sleep(Duration::from_millis(3500)).await;
        timer.shutdown();
        time::sleep(Duration::from_secs(20)).await;

        assert_eq!(timer.snapshot().remaining_secs, 7);
        assert!(!timer.start());
        assert!(store.get_all().unwrap().is_empty());

        // listener is gone, so the channel is closed
        assert!(host.send(Visibility::Background).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_ends_ticker() {
        let store = SessionStore::in_memory();
        let timer = controller(3, store.clone());
        timer.start();
        time::sleep(Duration::from_millis(1500)).await;
        drop(timer);
        time::sleep(Duration::from_secs(10)).await;
        assert!(store.get_all().unwrap().is_empty());
    }
}
