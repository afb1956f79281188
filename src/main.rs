use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use chat_speech_queue::piper::PiperBackend;
use chat_speech_queue::{QueueConfig, SettingsUpdate, SpeechHandle, SpeechService};

const MAX_SPEAKER_LEN: usize = 32;

#[derive(Debug, PartialEq)]
enum Line {
    Say {
        speaker: Option<String>,
        text: String,
    },
    On,
    Off,
    Stop,
    Voices,
    Status,
    Settings(SettingsUpdate),
    Invalid(String),
}

fn parse_line(line: &str) -> Line {
    let line = line.trim_end_matches(['\r', '\n']);

    let Some(command) = line.strip_prefix('/') else {
        return parse_message(line);
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    let number = |field: &str| -> Result<f32, String> {
        arg.parse()
            .map_err(|_| format!("/{} expects a number, got {:?}", field, arg))
    };

    match name {
        "on" => Line::On,
        "off" => Line::Off,
        "stop" => Line::Stop,
        "voices" => Line::Voices,
        "status" => Line::Status,
        "rate" => number("rate").map_or_else(Line::Invalid, |v| {
            Line::Settings(SettingsUpdate {
                rate: Some(v),
                ..Default::default()
            })
        }),
        "pitch" => number("pitch").map_or_else(Line::Invalid, |v| {
            Line::Settings(SettingsUpdate {
                pitch: Some(v),
                ..Default::default()
            })
        }),
        "volume" => number("volume").map_or_else(Line::Invalid, |v| {
            Line::Settings(SettingsUpdate::volume(v))
        }),
        "voice" if !arg.is_empty() => Line::Settings(SettingsUpdate {
            voice_name: Some(arg.to_string()),
            ..Default::default()
        }),
        "set" => serde_json::from_str(arg)
            .map(Line::Settings)
            .unwrap_or_else(|e| Line::Invalid(format!("/set expects JSON settings: {}", e))),
        _ => Line::Invalid(format!("Unknown command: /{}", name)),
    }
}

/// `name: message` carries a speaker label; anything else is read as-is.
fn parse_message(line: &str) -> Line {
    if let Some((speaker, text)) = line.split_once(": ") {
        let speaker = speaker.trim();
        if !speaker.is_empty()
            && speaker.chars().count() <= MAX_SPEAKER_LEN
            && !speaker.contains(char::is_whitespace)
        {
            return Line::Say {
                speaker: Some(speaker.to_string()),
                text: text.to_string(),
            };
        }
    }
    Line::Say {
        speaker: None,
        text: line.to_string(),
    }
}

async fn dispatch(speech: &SpeechHandle, line: Line) {
    match line {
        Line::Say { speaker, text } => speech.speak(text, speaker),
        Line::On => speech.toggle(true),
        Line::Off => speech.toggle(false),
        Line::Stop => speech.stop(),
        Line::Settings(update) => speech.update_settings(update),
        Line::Voices => {
            for voice in speech.available_voices().await {
                println!("{}\t{}", voice.id, voice);
            }
        }
        Line::Status => {
            if let Some(status) = speech.status().await {
                match serde_json::to_string_pretty(&status) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::error!("Failed to encode status: {}", e),
                }
            }
        }
        Line::Invalid(msg) => tracing::warn!("{}", msg),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Configuration from environment
    let voices_dir = std::env::var("VOICES_DIR").unwrap_or_else(|_| "./voices".to_string());
    let mut config = QueueConfig::from_env();
    if std::env::var("TTS_ENABLED").is_err() {
        config.start_enabled = true;
    }

    tracing::info!("chat-speech-queue v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Voices directory: {}", voices_dir);

    let voices_dir = PathBuf::from(voices_dir);
    let speech = SpeechService::spawn(config, |events| PiperBackend::detect(voices_dir, events));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch(&speech, parse_line(&line)).await,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    speech.idle().await;
}
