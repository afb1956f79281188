//! Local speech backend: Piper ONNX voices from a directory, phonemized with espeak-ng
//! and played on the default audio device.

pub mod engine;
pub mod playback;
pub mod voice;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, RwLock};

use crate::backend::{EventSink, SpeechBackend, Utterance, VoiceDescriptor};
use crate::error::SpeechError;

pub use engine::PiperEngine;
pub use playback::PlaybackSlot;
pub use voice::Voice;

type EngineCache = Arc<RwLock<HashMap<String, Arc<PiperEngine>>>>;

pub struct PiperBackend {
    renderer: Renderer,
}

impl PiperBackend {
    pub fn new(voices_dir: PathBuf, events: EventSink) -> Self {
        Self {
            renderer: Renderer {
                voices_dir,
                engines: Arc::new(RwLock::new(HashMap::new())),
                slot: PlaybackSlot::default(),
                events,
            },
        }
    }

    /// `None` unless the voices directory exists and espeak-ng can be run.
    pub fn detect(voices_dir: PathBuf, events: EventSink) -> Option<Self> {
        match check_host(&voices_dir) {
            Ok(()) => {
                tracing::info!("Piper backend using voices from {}", voices_dir.display());
                Some(Self::new(voices_dir, events))
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    fn list_voices(&self) -> Result<Vec<VoiceDescriptor>, SpeechError> {
        let dir = &self.renderer.voices_dir;
        let mut voices = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "onnx").unwrap_or(false) {
                let Some(id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                    continue;
                };

                match Voice::load(dir, &id) {
                    Ok(voice) => voices.push(voice.descriptor()),
                    Err(e) => tracing::debug!("Skipping {}: {}", id, e),
                }
            }
        }

        voices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(voices)
    }
}

impl SpeechBackend for PiperBackend {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        self.list_voices().unwrap_or_else(|e| {
            tracing::warn!("Failed to list voices: {}", e);
            Vec::new()
        })
    }

    fn is_available(&self) -> bool {
        self.renderer.voices_dir.is_dir()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        let voice_id = match &utterance.voice {
            Some(voice) => voice.id.clone(),
            None => self
                .voices()
                .into_iter()
                .next()
                .map(|v| v.id)
                .ok_or_else(|| SpeechError::VoiceNotFound("no voices installed".to_string()))?,
        };

        let id = utterance.id;
        self.renderer.slot.begin(id);

        let renderer = self.renderer.clone();
        tokio::task::spawn_blocking(move || renderer.run(voice_id, utterance));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(id) = self.renderer.slot.cancel() {
            tracing::debug!("Cancelled utterance {}", id);
        }
    }
}

/// Everything a blocking playback task needs.
#[derive(Clone)]
struct Renderer {
    voices_dir: PathBuf,
    engines: EngineCache,
    slot: PlaybackSlot,
    events: EventSink,
}

impl Renderer {
    fn run(&self, voice_id: String, utterance: Utterance) {
        let id = utterance.id;
        match self.render(&voice_id, &utterance) {
            Ok(true) => self.events.ended(id),
            Ok(false) => {
                let interrupted = SpeechError::Playback("interrupted".to_string());
                self.events.failed(id, interrupted.event_message());
            }
            Err(e) => {
                self.slot.finish(id);
                self.events.failed(id, e.event_message());
            }
        }
    }

    fn render(&self, voice_id: &str, utterance: &Utterance) -> Result<bool, SpeechError> {
        let id = utterance.id;
        let voice = Voice::load(&self.voices_dir, voice_id)?;
        let engine = self.get_engine(&voice)?;

        let phonemes = engine::phonemize(&utterance.text, voice.espeak_voice())?;
        let ids = engine::phonemes_to_ids(&phonemes, &voice.config.phoneme_id_map);

        // Piper has no pitch input. Playback speed shifts pitch and duration together,
        // so stretch by pitch / rate here and play at `pitch` speed.
        let stretch = utterance.pitch / utterance.rate;
        let samples = engine.synthesize(&ids, stretch)?;
        let wav = engine::samples_to_wav(&samples, voice.config.audio.sample_rate)?;

        if !self.slot.is_current(id) {
            return Ok(false);
        }

        let events = self.events.clone();
        playback::play_wav(
            &self.slot,
            id,
            wav,
            utterance.volume,
            utterance.pitch,
            move || events.started(id),
        )
    }

    fn get_engine(&self, voice: &Voice) -> Result<Arc<PiperEngine>, SpeechError> {
        {
            let engines = self.engines.read().map_err(|_| poisoned())?;
            if let Some(engine) = engines.get(&voice.id) {
                return Ok(Arc::clone(engine));
            }
        }

        let engine = Arc::new(PiperEngine::new(voice)?);

        {
            let mut engines = self.engines.write().map_err(|_| poisoned())?;
            engines.insert(voice.id.clone(), Arc::clone(&engine));
        }

        Ok(engine)
    }
}

fn check_host(voices_dir: &Path) -> Result<(), SpeechError> {
    if !voices_dir.is_dir() {
        return Err(SpeechError::BackendUnavailable(format!(
            "voices directory {} not found",
            voices_dir.display()
        )));
    }
    if Command::new("espeak-ng").arg("--version").output().is_err() {
        return Err(SpeechError::BackendUnavailable(
            "espeak-ng not found on PATH".to_string(),
        ));
    }
    Ok(())
}

fn poisoned() -> SpeechError {
    SpeechError::Playback("engine cache poisoned".to_string())
}
