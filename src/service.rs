//! Runs a [`SpeechQueueController`] on a single tokio task.
//!
//! Caller commands, backend events and cooldown timers all arrive as messages and are
//! handled one at a time, so the controller never needs a lock. [`SpeechHandle`] is the
//! shared, cloneable entry point handed to every part of the application that wants to
//! speak.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{BackendEvent, EventSink, SpeechBackend, VoiceDescriptor};
use crate::config::QueueConfig;
use crate::controller::{ControllerStatus, SettingsUpdate, SpeechQueueController, Timer};
use crate::voice::{LocaleMatcher, VoiceMatcher};

enum Command {
    Speak {
        text: String,
        speaker: Option<String>,
    },
    Toggle(bool),
    UpdateSettings(SettingsUpdate),
    Stop,
    Voices(oneshot::Sender<Vec<VoiceDescriptor>>),
    Status(oneshot::Sender<ControllerStatus>),
}

pub struct SpeechService;

impl SpeechService {
    /// Bind a backend and start the queue task. `bind` receives the sink the backend
    /// must report through and returns `None` when no backend is available on this host.
    pub fn spawn<B, F>(config: QueueConfig, bind: F) -> SpeechHandle
    where
        B: SpeechBackend,
        F: FnOnce(EventSink) -> Option<B>,
    {
        let matcher = Box::new(LocaleMatcher::from_config(&config));
        Self::spawn_with_matcher(config, matcher, bind)
    }

    pub fn spawn_with_matcher<B, F>(
        config: QueueConfig,
        matcher: Box<dyn VoiceMatcher>,
        bind: F,
    ) -> SpeechHandle
    where
        B: SpeechBackend,
        F: FnOnce(EventSink) -> Option<B>,
    {
        let (sink, events) = EventSink::channel();
        let backend = bind(sink);
        let controller = SpeechQueueController::with_matcher(backend, config, matcher);

        let (tx, commands) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(controller.status());
        let task = tokio::spawn(run(controller, commands, events, status_tx));

        SpeechHandle {
            tx,
            status,
            task: Arc::new(task),
        }
    }
}

async fn run<B: SpeechBackend>(
    mut controller: SpeechQueueController<B>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<BackendEvent>,
    status: watch::Sender<ControllerStatus>,
) {
    let (timer_tx, mut timers) = mpsc::unbounded_channel::<Timer>();
    schedule(&mut controller, &timer_tx);
    publish(&controller, &status);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handle(&mut controller, command),
                None => break,
            },
            Some(event) = events.recv() => controller.on_backend_event(event),
            Some(timer) = timers.recv() => controller.fire(timer),
        }
        schedule(&mut controller, &timer_tx);
        publish(&controller, &status);
    }

    controller.stop();
    debug!("Speech service stopped");
}

fn handle<B: SpeechBackend>(controller: &mut SpeechQueueController<B>, command: Command) {
    match command {
        Command::Speak { text, speaker } => controller.speak(&text, speaker),
        Command::Toggle(enabled) => controller.toggle(enabled),
        Command::UpdateSettings(update) => controller.update_settings(update),
        Command::Stop => controller.stop(),
        Command::Voices(reply) => {
            let _ = reply.send(controller.available_voices());
        }
        Command::Status(reply) => {
            let _ = reply.send(controller.status());
        }
    }
}

fn publish<B: SpeechBackend>(
    controller: &SpeechQueueController<B>,
    status: &watch::Sender<ControllerStatus>,
) {
    let current = controller.status();
    status.send_if_modified(|published| {
        if *published == current {
            return false;
        }
        *published = current;
        true
    });
}

fn schedule<B: SpeechBackend>(
    controller: &mut SpeechQueueController<B>,
    timer_tx: &mpsc::UnboundedSender<Timer>,
) {
    for (delay, timer) in controller.take_timers() {
        let tx = timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(timer);
        });
    }
}

/// Cloneable handle to the speech queue. Commands never fail; if the service task is
/// gone they are logged and dropped, and queries return empty defaults.
#[derive(Clone)]
pub struct SpeechHandle {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ControllerStatus>,
    task: Arc<JoinHandle<()>>,
}

impl SpeechHandle {
    pub fn speak(&self, text: impl Into<String>, speaker: Option<String>) {
        self.send(Command::Speak {
            text: text.into(),
            speaker,
        });
    }

    pub fn toggle(&self, enabled: bool) {
        self.send(Command::Toggle(enabled));
    }

    pub fn update_settings(&self, update: SettingsUpdate) {
        self.send(Command::UpdateSettings(update));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub async fn available_voices(&self) -> Vec<VoiceDescriptor> {
        self.query(Command::Voices).await.unwrap_or_default()
    }

    pub async fn status(&self) -> Option<ControllerStatus> {
        self.query(Command::Status).await
    }

    pub async fn is_enabled(&self) -> bool {
        self.status().await.is_some_and(|s| s.enabled)
    }

    pub async fn is_ready(&self) -> bool {
        self.status().await.is_some_and(|s| s.ready)
    }

    pub async fn queue_length(&self) -> usize {
        self.status().await.map(|s| s.queue_length).unwrap_or(0)
    }

    /// Resolves once nothing is queued or playing, or the service has stopped.
    pub async fn idle(&self) {
        // The round trip orders this after every command already sent.
        if self.status().await.is_none() {
            return;
        }
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|s| !s.speaking && s.queue_length == 0)
            .await;
    }

    /// Stop the service task. Other clones of this handle become inert.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Speech service is not running, dropping command");
        }
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply));
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBackend;
    use std::time::Duration;

    struct Harness {
        handle: SpeechHandle,
        backend: RecordingBackend,
        sink: EventSink,
    }

    fn start(backend: RecordingBackend) -> Harness {
        let recorded = backend.clone();
        let mut bound = None;
        let handle = SpeechService::spawn(QueueConfig::default(), |sink| {
            bound = Some(sink);
            Some(backend)
        });
        Harness {
            handle,
            backend: recorded,
            sink: bound.unwrap(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_world_scenario() {
        let h = start(RecordingBackend::with_default_voices());
        h.handle.toggle(true);
        h.handle.speak("hello", None);
        h.handle.speak("world", Some("ayse".into()));

        assert_eq!(h.handle.queue_length().await, 1);
        assert_eq!(h.backend.spoken_texts(), vec!["hello"]);

        h.sink.ended(h.backend.last().id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.backend.spoken_texts(), vec!["hello"]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.backend.spoken_texts(), vec!["hello", "world"]);
        assert_eq!(h.handle.queue_length().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_does_not_stall_queue() {
        let h = start(RecordingBackend::with_default_voices());
        h.handle.toggle(true);
        for text in ["one", "two", "three"] {
            h.handle.speak(text, None);
        }
        settle().await;

        h.sink.failed(h.backend.last().id, "synthesis-failed");
        tokio::time::sleep(Duration::from_millis(150)).await;
        h.sink.ended(h.backend.last().id);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(h.backend.spoken_texts(), vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_off_empties_queue() {
        let h = start(RecordingBackend::with_default_voices());
        h.handle.toggle(true);
        for text in ["one", "two", "three"] {
            h.handle.speak(text, None);
        }
        h.handle.toggle(false);

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.queue_length, 0);
        assert!(!status.enabled);
        assert!(!status.speaking);
        assert_eq!(h.backend.cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voices_changed_notification() {
        let backend = RecordingBackend::new(Vec::new());
        let h = start(backend);
        assert!(!h.handle.is_ready().await);
        assert!(h.handle.available_voices().await.is_empty());

        let voices = vec![
            VoiceDescriptor::new("en", "Alex", "en-US"),
            VoiceDescriptor::new("tr", "Yelda", "tr-TR"),
        ];
        h.backend.set_voices(voices.clone());
        h.sink.voices_changed();
        settle().await;

        assert!(h.handle.is_ready().await);
        assert_eq!(h.handle.available_voices().await, voices);
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.settings.voice.unwrap().name, "Yelda");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_retry_without_notification() {
        let backend = RecordingBackend::new(Vec::new());
        let h = start(backend);
        h.backend
            .set_voices(vec![VoiceDescriptor::new("en", "Alex", "en-US")]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(h.handle.is_ready().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_backend_drops_everything() {
        let handle = SpeechService::spawn(QueueConfig::default(), |_| None::<RecordingBackend>);
        handle.toggle(true);
        handle.speak("hello", None);
        assert!(!handle.is_ready().await);
        assert!(handle.is_enabled().await);
        assert_eq!(handle.queue_length().await, 0);
        assert!(handle.available_voices().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_resolves_after_drain() {
        let h = start(RecordingBackend::with_default_voices());
        h.handle.toggle(true);
        h.handle.speak("one", None);
        h.handle.speak("two", None);
        settle().await;

        let sink = h.sink.clone();
        let backend = h.backend.clone();
        tokio::spawn(async move {
            for _ in 0..2 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                sink.ended(backend.last().id);
            }
        });

        h.handle.idle().await;
        assert_eq!(h.backend.spoken_texts(), vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_wakes_on_status_change_without_polling() {
        let h = start(RecordingBackend::with_default_voices());
        h.handle.toggle(true);
        h.handle.speak("one", None);

        let waiter = {
            let handle = h.handle.clone();
            tokio::spawn(async move { handle.idle().await })
        };
        settle().await;
        assert!(!waiter.is_finished());
        assert!(h.handle.status.borrow().speaking);

        h.sink.ended(h.backend.last().id);
        tokio::time::sleep(Duration::from_millis(101)).await;
        settle().await;
        assert!(waiter.is_finished());
        assert!(!h.handle.status.borrow().speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_makes_handle_inert() {
        let h = start(RecordingBackend::with_default_voices());
        h.handle.shutdown();
        settle().await;
        h.handle.speak("ignored", None);
        assert!(h.handle.status().await.is_none());
        assert_eq!(h.handle.queue_length().await, 0);
    }
}
