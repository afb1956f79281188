use std::collections::HashMap;
use std::io::Cursor;
use std::process::Command;
use std::sync::Mutex;

use hound::{SampleFormat, WavSpec, WavWriter};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;

use super::voice::Voice;
use crate::error::SpeechError;

fn construction_error(context: &str, e: impl std::fmt::Display) -> SpeechError {
    SpeechError::Construction(format!("{}: {}", context, e))
}

pub struct PiperEngine {
    session: Mutex<Session>,
    noise_scale: f32,
    length_scale: f32,
    noise_w: f32,
}

impl PiperEngine {
    pub fn new(voice: &Voice) -> Result<Self, SpeechError> {
        let session = Session::builder()
            .map_err(|e| construction_error("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| construction_error("Failed to set optimization level", e))?
            .with_intra_threads(4)
            .map_err(|e| construction_error("Failed to set threads", e))?
            .commit_from_file(&voice.model_path)
            .map_err(|e| construction_error("Failed to load model", e))?;

        let inference = voice.config.inference.clone().unwrap_or_default();

        Ok(Self {
            session: Mutex::new(session),
            noise_scale: inference.noise_scale,
            length_scale: inference.length_scale,
            noise_w: inference.noise_w,
        })
    }

    /// Run the model. `stretch` multiplies the voice's length scale: above 1.0 is slower.
    pub fn synthesize(&self, phoneme_ids: &[i64], stretch: f32) -> Result<Vec<f32>, SpeechError> {
        if phoneme_ids.is_empty() {
            return Ok(Vec::new());
        }

        let input_len = phoneme_ids.len();

        // input: [batch, sequence] = [1, phoneme_count]
        let input_value = Value::from_array((vec![1, input_len], phoneme_ids.to_vec()))
            .map_err(|e| construction_error("Failed to create input tensor", e))?;

        let lengths_value = Value::from_array((vec![1], vec![input_len as i64]))
            .map_err(|e| construction_error("Failed to create lengths tensor", e))?;

        // scales: [noise_scale, length_scale, noise_w]
        let scales_value = Value::from_array((
            vec![3],
            vec![self.noise_scale, self.length_scale * stretch, self.noise_w],
        ))
        .map_err(|e| construction_error("Failed to create scales tensor", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| SpeechError::Construction("Piper session poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input_value, lengths_value, scales_value])
            .map_err(|e| construction_error("Inference failed", e))?;

        let output = outputs
            .get("output")
            .or_else(|| outputs.get("audio"))
            .ok_or_else(|| SpeechError::Construction("Missing output tensor".to_string()))?;

        let output_view = output
            .try_extract_tensor::<f32>()
            .map_err(|e| construction_error("Failed to extract output tensor", e))?;

        Ok(output_view.1.iter().copied().collect())
    }
}

/// Convert text to IPA phonemes using espeak-ng
pub fn phonemize(text: &str, voice: &str) -> Result<String, SpeechError> {
    if text.is_empty() {
        return Ok(String::new());
    }

    let output = Command::new("espeak-ng")
        .args(espeak_args(text, voice))
        .output()
        .map_err(|e| construction_error("Failed to run espeak-ng (is it installed?)", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SpeechError::Construction(format!(
            "espeak-ng failed: {}",
            stderr
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `--` ends option parsing, so chat text starting with `-` is never read as a flag.
fn espeak_args<'a>(text: &'a str, voice: &'a str) -> [&'a str; 6] {
    ["--ipa", "-q", "-v", voice, "--", text]
}

pub fn phonemes_to_ids(phonemes: &str, id_map: &HashMap<String, Vec<i64>>) -> Vec<i64> {
    let mut ids = Vec::new();

    // BOS
    match id_map.get("^") {
        Some(bos) => ids.extend(bos),
        None => ids.push(0),
    }

    for ch in phonemes.chars() {
        if let Some(mapped) = id_map.get(ch.to_string().as_str()) {
            ids.extend(mapped);
        }
        if let Some(pad) = id_map.get("_") {
            ids.extend(pad);
        }
    }

    // EOS
    match id_map.get("$") {
        Some(eos) => ids.extend(eos),
        None => ids.push(0),
    }

    ids
}

/// Encode mono f32 samples as 16-bit WAV
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SpeechError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Vec::new();
    {
        let cursor = Cursor::new(&mut buffer);
        let mut writer = WavWriter::new(cursor, spec)
            .map_err(|e| construction_error("Failed to create WAV writer", e))?;

        for sample in samples {
            // f32 [-1.0, 1.0] to i16 with 2x gain boost
            let scaled = (sample * 2.0 * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| construction_error("Failed to write sample", e))?;
        }

        writer
            .finalize()
            .map_err(|e| construction_error("Failed to finalize WAV", e))?;
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_for_empty_phonemes_have_bos_and_eos() {
        let ids = phonemes_to_ids("", &HashMap::new());
        assert_eq!(ids, vec![0, 0]);
    }

    #[test]
    fn test_ids_use_map_and_padding() {
        let map: HashMap<String, Vec<i64>> = [
            ("^".to_string(), vec![1]),
            ("$".to_string(), vec![2]),
            ("_".to_string(), vec![0]),
            ("a".to_string(), vec![14]),
        ]
        .into_iter()
        .collect();
        assert_eq!(phonemes_to_ids("aa", &map), vec![1, 14, 0, 14, 0, 2]);
    }

    #[test]
    fn test_espeak_args_end_options_before_text() {
        let args = espeak_args("-w/tmp/out.wav", "tr");
        assert_eq!(args, ["--ipa", "-q", "-v", "tr", "--", "-w/tmp/out.wav"]);

        let args = espeak_args("--stdout", "en");
        let text_pos = args.iter().position(|a| *a == "--stdout").unwrap();
        assert_eq!(args[text_pos - 1], "--");
        assert_eq!(text_pos, args.len() - 1);
    }

    #[test]
    fn test_empty_text_needs_no_espeak() {
        assert_eq!(phonemize("", "tr").unwrap(), "");
    }

    #[test]
    fn test_wav_header_even_when_empty() {
        let wav = samples_to_wav(&[], 22050).unwrap();
        assert!(wav.starts_with(b"RIFF"));
    }

    #[test]
    fn test_wav_contains_samples() {
        let samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0];
        let wav = samples_to_wav(&samples, 22050).unwrap();
        assert_eq!(wav.len(), 44 + samples.len() * 2);
    }
}
