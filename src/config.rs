use std::time::Duration;

/// Tunables for the speech queue. `Default` matches the behaviour chat clients expect;
/// `from_env` lets the binary override individual values.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Longest prefix (in chars) handed to the backend.
    pub max_chars: usize,
    /// Minimum gap between the end of one utterance and the start of the next.
    pub cooldown: Duration,
    /// Delay before the one-shot fallback retry of voice discovery.
    pub voice_retry_delay: Duration,
    /// Text equal to this is never spoken.
    pub sentinel: String,
    /// Substrings of a voice's language tag that mark the target locale.
    pub locale_langs: Vec<String>,
    /// Substrings of a voice's display name that mark the target locale.
    pub locale_names: Vec<String>,
    pub start_enabled: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_chars: 200,
            cooldown: Duration::from_millis(100),
            voice_retry_delay: Duration::from_millis(100),
            sentinel: "N/A".to_string(),
            locale_langs: vec!["tr".to_string()],
            locale_names: vec!["turkish".to_string(), "türkçe".to_string()],
            start_enabled: false,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `TTS_MAX_CHARS`, `TTS_COOLDOWN_MS`, `TTS_LOCALE_LANG`,
    /// `TTS_LOCALE_NAMES` (comma separated) and `TTS_ENABLED`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_parse::<usize>("TTS_MAX_CHARS") {
            cfg.max_chars = n;
        }
        if let Some(ms) = env_parse::<u64>("TTS_COOLDOWN_MS") {
            cfg.cooldown = Duration::from_millis(ms);
        }
        if let Ok(langs) = std::env::var("TTS_LOCALE_LANG") {
            cfg.locale_langs = split_list(&langs);
        }
        if let Ok(names) = std::env::var("TTS_LOCALE_NAMES") {
            cfg.locale_names = split_list(&names);
        }
        if let Ok(v) = std::env::var("TTS_ENABLED") {
            cfg.start_enabled = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
