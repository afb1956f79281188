//! Sequential playback queue.
//!
//! [`SpeechQueueController`] owns the queue, the flags and the playback settings. It is a
//! plain synchronous state machine: callers feed it commands, backend events and fired
//! timers; it asks for future timers through [`SpeechQueueController::take_timers`].
//! [`crate::service`] wires it to a tokio task.

use std::collections::VecDeque;
use std::mem;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendEvent, SpeechBackend, Utterance, UtteranceId, VoiceDescriptor};
use crate::config::QueueConfig;
use crate::voice::{self, LocaleMatcher, VoiceMatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakRequest {
    pub text: String,
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSettings {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Option<VoiceDescriptor>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            rate: 1.2,
            pitch: 1.0,
            volume: 0.8,
            voice: None,
        }
    }
}

/// Partial settings change. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    pub voice_name: Option<String>,
}

impl SettingsUpdate {
    pub fn volume(volume: f32) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackState {
    Idle,
    /// Between dequeue and the backend accepting the utterance.
    Draining,
    Speaking(UtteranceId),
    /// Waiting out the gap after an utterance finished or failed.
    CoolingDown { epoch: u64 },
}

/// Deferred work the controller wants delivered back after a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Drain { epoch: u64 },
    DiscoverVoices,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub ready: bool,
    pub speaking: bool,
    pub queue_length: usize,
    pub settings: PlaybackSettings,
}

pub struct SpeechQueueController<B> {
    backend: Option<B>,
    matcher: Box<dyn VoiceMatcher>,
    config: QueueConfig,
    settings: PlaybackSettings,
    enabled: bool,
    ready: bool,
    state: PlaybackState,
    queue: VecDeque<SpeakRequest>,
    next_utterance: u64,
    epoch: u64,
    timers: Vec<(Duration, Timer)>,
}

impl<B: SpeechBackend> SpeechQueueController<B> {
    /// Bind to `backend` if the host provides one. Without a backend the controller
    /// stays permanently not ready and drops every request.
    pub fn new(backend: Option<B>, config: QueueConfig) -> Self {
        let matcher = Box::new(LocaleMatcher::from_config(&config));
        Self::with_matcher(backend, config, matcher)
    }

    pub fn with_matcher(
        backend: Option<B>,
        config: QueueConfig,
        matcher: Box<dyn VoiceMatcher>,
    ) -> Self {
        let mut controller = Self {
            backend,
            matcher,
            enabled: config.start_enabled,
            config,
            settings: PlaybackSettings::default(),
            ready: false,
            state: PlaybackState::Idle,
            queue: VecDeque::new(),
            next_utterance: 0,
            epoch: 0,
            timers: Vec::new(),
        };

        if controller.backend.is_some() {
            controller.init_voices();
            // Some backends never announce their voices; look once more shortly after.
            let delay = controller.config.voice_retry_delay;
            controller.timers.push((delay, Timer::DiscoverVoices));
        } else {
            info!("No speech backend available, speech output disabled");
        }

        controller
    }

    /// Query the backend's voices and pick one. Safe to call repeatedly.
    pub fn init_voices(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        let voices = backend.voices();
        let Some((voice, matched)) = voice::select_voice(&voices, self.matcher.as_ref()) else {
            debug!("Backend reports no voices yet");
            return;
        };

        info!("Speech ready, {} voices, selected {}", voices.len(), voice);
        if !matched {
            let listing: Vec<String> = voices.iter().map(|v| v.to_string()).collect();
            warn!("No voice for the target locale, using default voice");
            warn!("Available voices: {}", listing.join(", "));
        }

        self.settings.voice = Some(voice.clone());
        self.ready = true;
    }

    pub fn toggle(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.stop();
        }
        info!("Speech {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn update_settings(&mut self, update: SettingsUpdate) {
        if let Some(rate) = update.rate {
            match positive(rate) {
                Some(rate) => self.settings.rate = rate,
                None => warn!("Ignoring invalid rate {}", rate),
            }
        }
        if let Some(pitch) = update.pitch {
            match positive(pitch) {
                Some(pitch) => self.settings.pitch = pitch,
                None => warn!("Ignoring invalid pitch {}", pitch),
            }
        }
        if let Some(volume) = update.volume {
            if volume.is_nan() {
                warn!("Ignoring invalid volume");
            } else {
                self.settings.volume = volume.clamp(0.0, 1.0);
            }
        }
        if let (Some(name), Some(backend)) = (update.voice_name, self.backend.as_ref()) {
            match backend.voices().into_iter().find(|v| v.name == name) {
                Some(voice) => {
                    debug!("Voice set to {}", voice);
                    self.settings.voice = Some(voice);
                }
                None => debug!("Unknown voice {:?}, keeping current selection", name),
            }
        }
    }

    pub fn speak(&mut self, text: &str, speaker: Option<String>) {
        if !self.enabled {
            return;
        }
        if text.trim().is_empty() || text == self.config.sentinel {
            return;
        }
        if self.backend.is_none() || !self.ready {
            warn!("Speech not ready yet, dropping message");
            return;
        }

        self.queue.push_back(SpeakRequest {
            text: text.to_string(),
            speaker,
        });

        if self.state == PlaybackState::Idle {
            self.drain();
        }
    }

    /// Cancel the current utterance and drop everything queued. Leaves `enabled` alone.
    pub fn stop(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.cancel();
        }
        self.queue.clear();
        self.state = PlaybackState::Idle;
    }

    pub fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Started(id) => {
                if self.state == PlaybackState::Speaking(id) {
                    debug!("Utterance {} started", id);
                }
            }
            BackendEvent::Ended(id) => {
                if self.state == PlaybackState::Speaking(id) {
                    debug!("Utterance {} finished", id);
                    self.cool_down();
                } else {
                    debug!("Ignoring end of stale utterance {}", id);
                }
            }
            BackendEvent::Failed { id, error } => {
                if self.state == PlaybackState::Speaking(id) {
                    error!("Utterance {} failed: {}", id, error);
                    self.cool_down();
                } else {
                    debug!("Ignoring failure of stale utterance {}: {}", id, error);
                }
            }
            BackendEvent::VoicesChanged => self.init_voices(),
        }
    }

    pub fn fire(&mut self, timer: Timer) {
        match timer {
            Timer::Drain { epoch } => {
                if self.state == (PlaybackState::CoolingDown { epoch }) {
                    self.drain();
                }
            }
            Timer::DiscoverVoices => self.init_voices(),
        }
    }

    /// Timers requested since the last call, as `(delay, timer)` pairs.
    pub fn take_timers(&mut self) -> Vec<(Duration, Timer)> {
        mem::take(&mut self.timers)
    }

    pub fn available_voices(&self) -> Vec<VoiceDescriptor> {
        self.backend
            .as_ref()
            .map(|b| b.voices())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_speaking(&self) -> bool {
        self.state != PlaybackState::Idle
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            enabled: self.enabled,
            ready: self.ready,
            speaking: self.is_speaking(),
            queue_length: self.queue.len(),
            settings: self.settings.clone(),
        }
    }

    fn drain(&mut self) {
        if self.queue.is_empty() {
            self.state = PlaybackState::Idle;
            return;
        }

        let usable = self.enabled && self.backend.as_ref().is_some_and(|b| b.is_available());
        if !usable {
            self.queue.clear();
            self.state = PlaybackState::Idle;
            return;
        }

        self.state = PlaybackState::Draining;
        let Some(request) = self.queue.pop_front() else {
            return;
        };

        self.next_utterance += 1;
        let id = UtteranceId(self.next_utterance);
        let utterance = Utterance {
            id,
            text: truncate_chars(&request.text, self.config.max_chars).to_string(),
            rate: self.settings.rate,
            pitch: self.settings.pitch,
            volume: self.settings.volume,
            voice: self.settings.voice.clone(),
        };

        debug!(
            "Speaking {} from {}: {}...",
            id,
            request.speaker.as_deref().unwrap_or("-"),
            truncate_chars(&utterance.text, 40)
        );

        let result = match self.backend.as_mut() {
            Some(backend) => backend.speak(utterance),
            None => return,
        };

        match result {
            Ok(()) => self.state = PlaybackState::Speaking(id),
            Err(e) => {
                error!("Failed to start utterance {}: {}", id, e);
                self.cool_down();
            }
        }
    }

    fn cool_down(&mut self) {
        self.epoch += 1;
        self.state = PlaybackState::CoolingDown { epoch: self.epoch };
        self.timers
            .push((self.config.cooldown, Timer::Drain { epoch: self.epoch }));
    }
}

fn positive(value: f32) -> Option<f32> {
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Prefix of at most `max` chars.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
