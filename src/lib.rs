pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
#[cfg(feature = "audio-playback")]
pub mod piper;
pub mod service;
pub mod voice;

#[cfg(test)]
mod testing;

pub use backend::{
    BackendEvent, EventSink, SpeechBackend, Utterance, UtteranceId, VoiceDescriptor,
};
pub use config::QueueConfig;
pub use controller::{
    ControllerStatus, PlaybackSettings, SettingsUpdate, SpeakRequest, SpeechQueueController,
};
pub use error::SpeechError;
pub use service::{SpeechHandle, SpeechService};
pub use voice::{LocaleMatcher, VoiceMatcher};
