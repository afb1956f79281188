use std::sync::{Arc, Mutex};

use crate::backend::{SpeechBackend, Utterance, VoiceDescriptor};
use crate::error::SpeechError;

#[derive(Default)]
struct Shared {
    voices: Vec<VoiceDescriptor>,
    spoken: Vec<Utterance>,
    cancels: usize,
    fail_next: bool,
    available: bool,
}

/// Records everything it is asked to do. Lifecycle events are fired by the test.
#[derive(Clone)]
pub struct RecordingBackend {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingBackend {
    pub fn new(voices: Vec<VoiceDescriptor>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                voices,
                available: true,
                ..Default::default()
            })),
        }
    }

    pub fn with_default_voices() -> Self {
        Self::new(vec![
            VoiceDescriptor::new("en", "Samantha", "en-US"),
            VoiceDescriptor::new("yelda", "Yelda", "tr-TR"),
        ])
    }

    pub fn set_voices(&self, voices: Vec<VoiceDescriptor>) {
        self.shared.lock().unwrap().voices = voices;
    }

    pub fn fail_next(&self) {
        self.shared.lock().unwrap().fail_next = true;
    }

    pub fn set_available(&self, available: bool) {
        self.shared.lock().unwrap().available = available;
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.shared.lock().unwrap().spoken.clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken().into_iter().map(|u| u.text).collect()
    }

    pub fn last(&self) -> Utterance {
        self.spoken().last().cloned().expect("nothing spoken")
    }

    pub fn cancels(&self) -> usize {
        self.shared.lock().unwrap().cancels
    }
}

impl SpeechBackend for RecordingBackend {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        self.shared.lock().unwrap().voices.clone()
    }

    fn is_available(&self) -> bool {
        self.shared.lock().unwrap().available
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        let mut shared = self.shared.lock().unwrap();
        if std::mem::take(&mut shared.fail_next) {
            return Err(SpeechError::Construction("synthetic failure".into()));
        }
        shared.spoken.push(utterance);
        Ok(())
    }

    fn cancel(&mut self) {
        self.shared.lock().unwrap().cancels += 1;
    }
}
