//! Bridge supervisor: connection lifecycle and activity dispatch
//!
//! One supervisor loop walks the link through Disconnected, Connecting,
//! Ready, and SteadyState. The first connect and every reconnect pass
//! through the same Ready step, so on-connect commands, the auto-disconnect
//! timer, and the heartbeat are re-armed each time the link comes back.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::activity::AvActivity;
use crate::config::EventsConfig;
use crate::dispatch;
use crate::events::CommandCategory;
use crate::state::StateMachine;
use crate::transport::Transport;

/// How long to wait for the link to carry GATT traffic after connecting
const READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause between reconnect attempts
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
/// Cadence of cooldown re-evaluation
const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Settle time after disconnecting on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Errors that end the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("could not find or connect to IR blaster; ensure it is on and paired")]
    ConnectFailed,
}

/// Phases of the link to the blaster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Link lost; waiting to retry
    Disconnected,
    /// Connect attempt in progress
    Connecting,
    /// Connected; post-connect setup pending
    Ready,
    /// Set up and monitoring activity
    SteadyState,
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkPhase::Disconnected => write!(f, "Disconnected"),
            LinkPhase::Connecting => write!(f, "Connecting"),
            LinkPhase::Ready => write!(f, "Ready"),
            LinkPhase::SteadyState => write!(f, "SteadyState"),
        }
    }
}

/// Drives the blaster from camera/microphone activity
pub struct Bridge<T: Transport + ?Sized + 'static> {
    transport: Arc<T>,
    events: Arc<EventsConfig>,
    machine: Arc<Mutex<StateMachine>>,
}

impl<T: Transport + ?Sized + 'static> Clone for Bridge<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            events: Arc::clone(&self.events),
            machine: Arc::clone(&self.machine),
        }
    }
}

/// Background tasks started once the link is first up
struct ActivityTasks {
    activity: JoinHandle<()>,
    tick: JoinHandle<()>,
}

impl<T: Transport + ?Sized + 'static> Bridge<T> {
    /// Create a bridge; the state machine's idle delay comes from the
    /// first `Idle` command
    pub fn new(transport: Arc<T>, events: EventsConfig) -> Self {
        let machine = StateMachine::new(events.idle_delay());
        Self {
            transport,
            events: Arc::new(events),
            machine: Arc::new(Mutex::new(machine)),
        }
    }

    /// Run until `shutdown` completes.
    ///
    /// `initial` is the activity observed before connecting; `activity_rx`
    /// delivers every later change. Fails only if the very first connect
    /// attempt fails.
    pub async fn run<F>(
        self,
        initial: AvActivity,
        activity_rx: mpsc::Receiver<AvActivity>,
        shutdown: F,
    ) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        self.transport.set_disconnect_handler(Some(Box::new(move || {
            let _ = disconnect_tx.send(());
        })));

        let mut activity_rx = Some(activity_rx);
        let mut tasks: Option<ActivityTasks> = None;
        let mut heartbeat: Option<JoinHandle<()>> = None;
        let mut phase = LinkPhase::Connecting;

        loop {
            let next = match phase {
                LinkPhase::Disconnected => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(RECONNECT_INTERVAL) => LinkPhase::Connecting,
                    }
                }

                LinkPhase::Connecting => {
                    let first = tasks.is_none();
                    if self.transport.is_connected() {
                        LinkPhase::Ready
                    } else {
                        if first {
                            info!("connecting to IR blaster");
                        } else {
                            info!("reconnecting to IR blaster");
                        }
                        let connected = tokio::select! {
                            _ = &mut shutdown => break,
                            connected = self.transport.connect() => connected,
                        };
                        match (connected, first) {
                            (true, _) => LinkPhase::Ready,
                            (false, true) => {
                                self.transport.set_disconnect_handler(None);
                                error!("could not find or connect to IR blaster; ensure it is on and paired");
                                return Err(BridgeError::ConnectFailed);
                            }
                            (false, false) => LinkPhase::Disconnected,
                        }
                    }
                }

                LinkPhase::Ready => {
                    if let Some(old) = heartbeat.take() {
                        old.abort();
                    }
                    heartbeat = tokio::select! {
                        _ = &mut shutdown => break,
                        handle = self.establish() => handle,
                    };

                    // Notifications queued before this connect are stale
                    while disconnect_rx.try_recv().is_ok() {}

                    if let Some(activity_rx) = activity_rx.take() {
                        info!("connected, monitoring camera/mic");
                        if let Some(category) = self.evaluate(initial.is_active()) {
                            tokio::select! {
                                _ = &mut shutdown => break,
                                _ = self.dispatch(category, "initial") => {}
                            }
                        }
                        tasks = Some(self.start_activity_tasks(initial, activity_rx));
                    }

                    if self.transport.is_connected() {
                        LinkPhase::SteadyState
                    } else {
                        LinkPhase::Disconnected
                    }
                }

                LinkPhase::SteadyState => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        Some(()) = disconnect_rx.recv() => {
                            if self.transport.is_connected() {
                                debug!("disconnect notification while connected, ignoring");
                                LinkPhase::SteadyState
                            } else {
                                warn!("link to IR blaster lost");
                                if let Some(old) = heartbeat.take() {
                                    old.abort();
                                }
                                LinkPhase::Disconnected
                            }
                        }
                    }
                }
            };

            if next != phase {
                debug!(from = %phase, to = %next, "link phase");
            }
            phase = next;
        }

        self.shutdown(heartbeat, tasks).await;
        Ok(())
    }

    /// Post-connect setup shared by the first connect and every reconnect.
    ///
    /// Returns the heartbeat task, if heartbeats are enabled.
    async fn establish(&self) -> Option<JoinHandle<()>> {
        match self.transport.wait_until_ready(READY_TIMEOUT).await {
            Ok(()) => {
                dispatch::execute(
                    &*self.transport,
                    self.events.specs(CommandCategory::OnConnect),
                    "on connect",
                )
                .await;
            }
            Err(e) => {
                warn!(error = %e, "link not ready, skipping on-connect commands");
            }
        }

        if let Some((name, delay)) = self.events.disconnect_schedule() {
            if let Err(e) = self.transport.schedule_disconnect_command(name, delay).await {
                warn!(command = %name, error = %e, "schedule disconnect command failed");
            }
        }

        self.events.heartbeat_interval().map(|interval| {
            debug!(interval_secs = interval.as_secs(), "starting heartbeat");
            tokio::spawn(self.clone().heartbeat_loop(interval))
        })
    }

    fn start_activity_tasks(
        &self,
        initial: AvActivity,
        activity_rx: mpsc::Receiver<AvActivity>,
    ) -> ActivityTasks {
        let (current_tx, current_rx) = watch::channel(initial.is_active());
        ActivityTasks {
            activity: tokio::spawn(self.clone().activity_loop(activity_rx, current_tx)),
            tick: tokio::spawn(self.clone().tick_loop(current_rx)),
        }
    }

    /// Keep the accessory's auto-disconnect timer from firing
    async fn heartbeat_loop(self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if !self.transport.is_connected() {
                debug!("link down, heartbeat stopped");
                return;
            }
            if let Err(e) = self.transport.send_heartbeat().await {
                debug!(error = %e, "heartbeat failed");
            }
        }
    }

    /// Feed every activity change into the state machine
    async fn activity_loop(
        self,
        mut activity_rx: mpsc::Receiver<AvActivity>,
        current: watch::Sender<bool>,
    ) {
        while let Some(activity) = activity_rx.recv().await {
            debug!(
                camera = activity.camera,
                microphone = activity.microphone,
                "activity update"
            );
            let active = activity.is_active();
            current.send_replace(active);
            if let Some(category) = self.evaluate(active) {
                self.dispatch(category, "activity").await;
            }
        }
        info!("activity stream ended");
    }

    /// Re-evaluate the last known activity so cooldown expiry is noticed
    async fn tick_loop(self, current: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let active = *current.borrow();
            if let Some(category) = self.evaluate(active) {
                self.dispatch(category, "cooldown").await;
            }
        }
    }

    fn evaluate(&self, active: bool) -> Option<CommandCategory> {
        let now = Instant::now().into_std();
        self.machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(active, now)
    }

    async fn dispatch(&self, category: CommandCategory, context: &str) {
        if !self.transport.is_connected() {
            debug!(%category, context, "not connected, dropping commands");
            return;
        }
        info!(%category, context, "dispatching commands");
        dispatch::execute(&*self.transport, self.events.specs(category), context).await;
    }

    async fn shutdown(&self, heartbeat: Option<JoinHandle<()>>, tasks: Option<ActivityTasks>) {
        info!("shutting down bridge");

        let (activity, tick) = match tasks {
            Some(tasks) => (Some(tasks.activity), Some(tasks.tick)),
            None => (None, None),
        };
        for (name, task) in [("heartbeat", heartbeat), ("activity", activity), ("tick", tick)] {
            let Some(task) = task else { continue };
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(task = name, error = %e, "task failed"),
            }
        }

        self.transport.set_disconnect_handler(None);
        self.transport.disconnect().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        info!("bridge shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::Config;
    use crate::state::ActivityState;
    use crate::testing::MockTransport;

    struct Harness {
        transport: MockTransport,
        activity_tx: mpsc::Sender<AvActivity>,
        shutdown_tx: oneshot::Sender<()>,
        handle: JoinHandle<Result<(), BridgeError>>,
        machine: Arc<Mutex<StateMachine>>,
    }

    impl Harness {
        fn start(transport: MockTransport, events: EventsConfig, initial: AvActivity) -> Self {
            let bridge = Bridge::new(Arc::new(transport.clone()), events);
            let machine = Arc::clone(&bridge.machine);
            let (activity_tx, activity_rx) = mpsc::channel(8);
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(bridge.run(initial, activity_rx, async move {
                let _ = shutdown_rx.await;
            }));
            Self {
                transport,
                activity_tx,
                shutdown_tx,
                handle,
                machine,
            }
        }

        fn state(&self) -> ActivityState {
            self.machine.lock().unwrap().state()
        }

        async fn activity(&self, camera: bool, microphone: bool) {
            self.activity_tx
                .send(AvActivity::new(camera, microphone))
                .await
                .unwrap();
        }

        async fn stop(self) -> MockTransport {
            self.shutdown_tx.send(()).unwrap();
            tokio_test::assert_ok!(self.handle.await.unwrap());
            self.transport
        }
    }

    fn events(yaml: &str) -> EventsConfig {
        Config::from_yaml_str(yaml).unwrap().events
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_failure_is_fatal() {
        let transport = MockTransport::new();
        transport.script_connects(&[false]);
        let bridge = Bridge::new(Arc::new(transport.clone()), EventsConfig::default());
        let (_tx, rx) = mpsc::channel(1);

        let result = bridge.run(AvActivity::default(), rx, std::future::pending()).await;

        assert!(matches!(result, Err(BridgeError::ConnectFailed)));
        assert_eq!(transport.connect_calls(), 1);
        assert!(!transport.has_disconnect_handler());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_connect_setup() {
        let harness = Harness::start(
            MockTransport::new(),
            EventsConfig::default(),
            AvActivity::default(),
        );
        advance(130).await;

        assert_eq!(harness.transport.sent(), vec!["On"]);
        assert_eq!(
            harness.transport.scheduled(),
            vec![("Off".to_string(), Duration::from_secs(900))]
        );
        assert_eq!(harness.transport.heartbeats(), 2);
        assert!(harness.transport.has_disconnect_handler());

        let transport = harness.stop().await;
        assert_eq!(transport.disconnect_calls(), 1);
        assert!(!transport.has_disconnect_handler());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_connect_list_runs_in_order() {
        let harness = Harness::start(
            MockTransport::new(),
            events("events:\n  OnConnect:\n    - On\n    - { NamedCommand: Green, Delay: 2 }\n"),
            AvActivity::default(),
        );
        advance(1).await;
        assert_eq!(harness.transport.sent(), vec!["On"]);
        advance(2).await;
        assert_eq!(harness.transport.sent(), vec!["On", "Green"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_activity_dispatches_active() {
        let harness = Harness::start(
            MockTransport::new(),
            EventsConfig::default(),
            AvActivity::new(false, true),
        );
        advance(1).await;

        assert_eq!(harness.transport.sent(), vec!["On", "Red"]);
        assert_eq!(harness.state(), ActivityState::Active);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_start_and_end_with_cooldown() {
        let harness = Harness::start(
            MockTransport::new(),
            events("events:\n  Idle: { NamedCommand: Green, Delay: 3 }\n"),
            AvActivity::default(),
        );
        advance(1).await;

        harness.activity(true, false).await;
        advance(1).await;
        assert_eq!(harness.transport.sent(), vec!["On", "Red"]);

        harness.activity(false, false).await;
        advance(2).await;
        assert_eq!(harness.state(), ActivityState::Cooldown);
        assert_eq!(harness.transport.sent(), vec!["On", "Red"]);

        // Tick notices expiry; the Idle command then waits its own delay
        advance(10).await;
        assert_eq!(harness.state(), ActivityState::Idle);
        assert_eq!(harness.transport.sent(), vec!["On", "Red", "Green"]);

        advance(30).await;
        assert_eq!(harness.transport.sent(), vec!["On", "Red", "Green"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_brief_drop_does_not_flicker() {
        let harness = Harness::start(
            MockTransport::new(),
            events("events:\n  Idle: { NamedCommand: Green, Delay: 5 }\n"),
            AvActivity::default(),
        );
        advance(1).await;

        harness.activity(true, true).await;
        advance(1).await;
        harness.activity(false, false).await;
        advance(2).await;
        harness.activity(false, true).await;
        advance(20).await;

        assert_eq!(harness.state(), ActivityState::Active);
        assert_eq!(harness.transport.sent(), vec!["On", "Red"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_reruns_post_connect_setup() {
        let harness = Harness::start(
            MockTransport::new(),
            EventsConfig::default(),
            AvActivity::default(),
        );
        advance(1).await;
        assert_eq!(harness.transport.sent(), vec!["On"]);

        harness.transport.drop_link();
        advance(3).await;
        assert_eq!(harness.transport.connect_calls(), 1);

        advance(3).await;
        assert_eq!(harness.transport.connect_calls(), 2);
        assert_eq!(harness.transport.sent(), vec!["On", "On"]);
        assert_eq!(harness.transport.scheduled().len(), 2);

        // Heartbeat re-armed on the new link
        advance(60).await;
        assert!(harness.transport.heartbeats() >= 1);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_disconnect_notifications_reconnect_once() {
        let harness = Harness::start(
            MockTransport::new(),
            EventsConfig::default(),
            AvActivity::default(),
        );
        advance(1).await;

        harness.transport.drop_link();
        harness.transport.fire_disconnect_handler();
        harness.transport.fire_disconnect_handler();
        advance(20).await;

        assert_eq!(harness.transport.connect_calls(), 2);
        assert_eq!(harness.transport.sent(), vec!["On", "On"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_while_connected_is_ignored() {
        let harness = Harness::start(
            MockTransport::new(),
            EventsConfig::default(),
            AvActivity::default(),
        );
        advance(1).await;

        harness.transport.fire_disconnect_handler();
        advance(20).await;

        assert_eq!(harness.transport.connect_calls(), 1);
        assert_eq!(harness.transport.sent(), vec!["On"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_until_connected() {
        let transport = MockTransport::new();
        transport.script_connects(&[true, false, false]);
        let harness = Harness::start(transport, EventsConfig::default(), AvActivity::default());
        advance(1).await;

        harness.transport.drop_link();
        advance(11).await;
        assert_eq!(harness.transport.connect_calls(), 3);
        assert_eq!(harness.transport.sent(), vec!["On"]);

        advance(5).await;
        assert_eq!(harness.transport.connect_calls(), 4);
        assert_eq!(harness.transport.sent(), vec!["On", "On"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_dropped_while_disconnected() {
        let transport = MockTransport::new();
        transport.script_connects(&[true, false, false, false, false, false]);
        let harness = Harness::start(transport, EventsConfig::default(), AvActivity::default());
        advance(1).await;

        harness.transport.drop_link();
        harness.activity(true, false).await;
        advance(2).await;

        assert_eq!(harness.state(), ActivityState::Active);
        assert_eq!(harness.transport.attempted(), vec!["On"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_skips_on_connect_only() {
        let transport = MockTransport::new();
        transport.set_ready(false);
        let harness = Harness::start(transport, EventsConfig::default(), AvActivity::default());
        advance(READY_TIMEOUT.as_secs() + 1).await;

        assert!(harness.transport.sent().is_empty());
        assert_eq!(harness.transport.scheduled().len(), 1);

        harness.activity(true, false).await;
        advance(1).await;
        assert_eq!(harness.transport.sent(), vec!["Red"]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_disabled_when_interval_zero() {
        let harness = Harness::start(
            MockTransport::new(),
            events("events:\n  HeartbeatStopped: { HeartbeatInterval: 0 }\n"),
            AvActivity::default(),
        );
        advance(300).await;

        assert_eq!(harness.transport.heartbeats(), 0);
        assert_eq!(harness.transport.scheduled().len(), 1);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_reconnecting() {
        let transport = MockTransport::new();
        transport.script_connects(&[true, false, false, false, false]);
        let harness = Harness::start(transport, EventsConfig::default(), AvActivity::default());
        advance(1).await;

        harness.transport.drop_link();
        advance(7).await;

        let transport = harness.stop().await;
        assert_eq!(transport.disconnect_calls(), 1);
        assert!(!transport.has_disconnect_handler());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_stream_end_keeps_ticking() {
        let harness = Harness::start(
            MockTransport::new(),
            events("events:\n  Idle: { NamedCommand: Green, Delay: 2 }\n"),
            AvActivity::default(),
        );
        advance(1).await;

        harness.activity(true, false).await;
        harness.activity(false, false).await;
        advance(1).await;
        assert_eq!(harness.state(), ActivityState::Cooldown);

        let Harness {
            transport,
            activity_tx,
            shutdown_tx,
            handle,
            machine,
        } = harness;
        drop(activity_tx);
        advance(10).await;

        assert_eq!(machine.lock().unwrap().state(), ActivityState::Idle);
        assert_eq!(transport.sent(), vec!["On", "Red", "Green"]);

        shutdown_tx.send(()).unwrap();
        tokio_test::assert_ok!(handle.await.unwrap());
    }
}
