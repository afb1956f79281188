use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::backend::VoiceDescriptor;
use crate::error::SpeechError;

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub audio: AudioConfig,
    pub espeak: Option<EspeakConfig>,
    #[serde(default)]
    pub language: Option<LanguageConfig>,
    #[serde(default)]
    pub phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EspeakConfig {
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageConfig {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_w")]
    pub noise_w: f32,
}

fn default_noise_scale() -> f32 {
    0.667
}

fn default_length_scale() -> f32 {
    1.0
}

fn default_noise_w() -> f32 {
    0.8
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

/// A Piper model (`<id>.onnx`) and its sidecar config (`<id>.onnx.json`).
#[derive(Debug)]
pub struct Voice {
    pub id: String,
    pub config: VoiceConfig,
    pub model_path: PathBuf,
}

impl Voice {
    pub fn load(voices_dir: &Path, voice_id: &str) -> Result<Self, SpeechError> {
        let model_path = voices_dir.join(format!("{}.onnx", voice_id));
        let config_path = voices_dir.join(format!("{}.onnx.json", voice_id));

        if !model_path.exists() {
            return Err(SpeechError::VoiceNotFound(voice_id.to_string()));
        }

        if !config_path.exists() {
            return Err(SpeechError::VoiceNotFound(format!(
                "{} (missing config file)",
                voice_id
            )));
        }

        let config: VoiceConfig = serde_json::from_reader(File::open(&config_path)?)?;

        Ok(Self {
            id: voice_id.to_string(),
            config,
            model_path,
        })
    }

    /// espeak-ng voice used for phonemization.
    pub fn espeak_voice(&self) -> &str {
        self.config
            .espeak
            .as_ref()
            .map(|e| e.voice.as_str())
            .unwrap_or("en")
    }

    pub fn descriptor(&self) -> VoiceDescriptor {
        let language = self
            .config
            .language
            .as_ref()
            .map(|l| l.code.clone())
            .unwrap_or_else(|| self.espeak_voice().to_string());

        VoiceDescriptor::new(&self.id, parse_voice_name(&self.id), language)
    }
}

fn parse_voice_name(id: &str) -> String {
    // Pattern: language-name-quality (e.g., tr_TR-dfki-medium)
    let parts: Vec<&str> = id.split('-').collect();
    if parts.len() >= 2 {
        let name = parts[1];
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => id.to_string(),
        }
    } else {
        id.to_string()
    }
}
