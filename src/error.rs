#[derive(thiserror::Error, Debug)]
pub enum SpeechError {
    #[error("Speech backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Voice not found: {0}")]
    VoiceNotFound(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Failed to build utterance: {0}")]
    Construction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpeechError {
    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SpeechError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            SpeechError::VoiceNotFound(_) => "VOICE_NOT_FOUND",
            SpeechError::Playback(_) => "PLAYBACK_ERROR",
            SpeechError::Construction(_) => "CONSTRUCTION_ERROR",
            SpeechError::Io(_) => "IO_ERROR",
            SpeechError::Json(_) => "JSON_ERROR",
        }
    }

    /// `CODE: message`, the error text carried by `BackendEvent::Failed`.
    pub fn event_message(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}
