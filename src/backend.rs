//! The seam between the queue and whatever actually produces audio.
//!
//! A backend renders one [`Utterance`] at a time and reports its lifecycle through the
//! [`EventSink`] it was bound with. Events are delivered back to the controller on the
//! service task, never concurrently with controller calls.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SpeechError;

/// One selectable synthetic voice exposed by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceDescriptor {
    /// Backend-specific identifier (model stem, platform voice id, ...).
    pub id: String,
    /// Display name.
    pub name: String,
    /// BCP 47-ish language tag as reported by the backend, e.g. `tr-TR` or `en_GB`.
    pub language: String,
}

impl VoiceDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language: language.into(),
        }
    }
}

impl fmt::Display for VoiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.language)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A fully configured unit of text handed to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Option<VoiceDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Started(UtteranceId),
    Ended(UtteranceId),
    Failed { id: UtteranceId, error: String },
    /// The backend's voice list changed (or finished loading).
    VoicesChanged,
}

/// Where a backend reports [`BackendEvent`]s. Cheap to clone; safe to move into
/// blocking playback tasks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: BackendEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Speech service gone, dropping backend event");
        }
    }

    pub fn started(&self, id: UtteranceId) {
        self.emit(BackendEvent::Started(id));
    }

    pub fn ended(&self, id: UtteranceId) {
        self.emit(BackendEvent::Ended(id));
    }

    pub fn failed(&self, id: UtteranceId, error: impl Into<String>) {
        self.emit(BackendEvent::Failed {
            id,
            error: error.into(),
        });
    }

    pub fn voices_changed(&self) {
        self.emit(BackendEvent::VoicesChanged);
    }
}

/// Host speech-synthesis capability.
pub trait SpeechBackend: Send + 'static {
    /// Current voice list. May be empty until the backend has loaded its voices.
    fn voices(&self) -> Vec<VoiceDescriptor>;

    /// Whether the backend can still accept work.
    fn is_available(&self) -> bool {
        true
    }

    /// Start rendering `utterance`. Returning `Ok` promises exactly one later
    /// `Ended` or `Failed` event for `utterance.id` unless it is cancelled first.
    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError>;

    /// Cancel whatever is currently being rendered. A no-op when idle.
    fn cancel(&mut self);
}

impl<B: SpeechBackend + ?Sized> SpeechBackend for Box<B> {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        (**self).voices()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        (**self).speak(utterance)
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_display() {
        let voice = VoiceDescriptor::new("tr_TR-dfki-medium", "Dfki", "tr_TR");
        assert_eq!(voice.to_string(), "Dfki (tr_TR)");
    }

    #[test]
    fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.started(UtteranceId(1));
        sink.failed(UtteranceId(1), "interrupted");
        sink.voices_changed();

        assert_eq!(rx.try_recv().unwrap(), BackendEvent::Started(UtteranceId(1)));
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendEvent::Failed {
                id: UtteranceId(1),
                error: "interrupted".into()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), BackendEvent::VoicesChanged);
    }

    #[test]
    fn test_sink_survives_closed_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.ended(UtteranceId(7));
    }
}
