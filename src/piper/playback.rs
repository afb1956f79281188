use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use rodio::{Decoder, OutputStream, Sink};

use crate::backend::UtteranceId;
use crate::error::SpeechError;

struct Active {
    id: UtteranceId,
    sink: Option<Arc<Sink>>,
}

/// Tracks the one utterance that may currently own the audio device.
#[derive(Clone, Default)]
pub struct PlaybackSlot {
    inner: Arc<Mutex<Option<Active>>>,
}

impl PlaybackSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        // A panicked playback thread leaves nothing worth protecting.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for `id`, displacing whatever held it.
    pub fn begin(&self, id: UtteranceId) {
        let previous = self.lock().replace(Active { id, sink: None });
        if let Some(sink) = previous.and_then(|a| a.sink) {
            sink.stop();
        }
    }

    /// Release the slot and silence its sink. Returns the id that was playing.
    pub fn cancel(&self) -> Option<UtteranceId> {
        let active = self.lock().take()?;
        if let Some(sink) = active.sink {
            sink.stop();
        }
        Some(active.id)
    }

    pub fn is_current(&self, id: UtteranceId) -> bool {
        self.lock().as_ref().is_some_and(|a| a.id == id)
    }

    fn attach(&self, id: UtteranceId, sink: Arc<Sink>) -> bool {
        match self.lock().as_mut() {
            Some(active) if active.id == id => {
                active.sink = Some(sink);
                true
            }
            _ => false,
        }
    }

    /// Release the slot if `id` still holds it. False means it was cancelled or displaced.
    pub fn finish(&self, id: UtteranceId) -> bool {
        let mut guard = self.lock();
        if guard.as_ref().is_some_and(|a| a.id == id) {
            *guard = None;
            true
        } else {
            false
        }
    }
}

/// Play a WAV buffer on the default output device, blocking until it ends or is
/// cancelled through `slot`. Returns whether playback ran to completion.
pub fn play_wav(
    slot: &PlaybackSlot,
    id: UtteranceId,
    wav: Vec<u8>,
    volume: f32,
    speed: f32,
    on_start: impl FnOnce(),
) -> Result<bool, SpeechError> {
    let (_stream, stream_handle) = OutputStream::try_default()
        .map_err(|e| SpeechError::Playback(format!("No audio output device: {}", e)))?;
    let sink = Sink::try_new(&stream_handle)
        .map_err(|e| SpeechError::Playback(format!("Failed to open audio sink: {}", e)))?;
    let source = Decoder::new(Cursor::new(wav))
        .map_err(|e| SpeechError::Playback(format!("Failed to decode audio: {}", e)))?;

    sink.pause();
    sink.set_volume(volume);
    sink.set_speed(speed);
    sink.append(source);

    let sink = Arc::new(sink);
    if !slot.attach(id, Arc::clone(&sink)) {
        return Ok(false);
    }

    on_start();
    sink.play();
    sink.sleep_until_end();

    Ok(slot.finish(id))
}
