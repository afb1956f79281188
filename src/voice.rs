use crate::backend::VoiceDescriptor;
use crate::config::QueueConfig;

/// Decides whether a voice belongs to the target locale.
pub trait VoiceMatcher: Send {
    fn matches(&self, voice: &VoiceDescriptor) -> bool;
}

impl<F> VoiceMatcher for F
where
    F: Fn(&VoiceDescriptor) -> bool + Send,
{
    fn matches(&self, voice: &VoiceDescriptor) -> bool {
        self(voice)
    }
}

/// Case-insensitive substring match on the language tag or the display name.
#[derive(Debug, Clone)]
pub struct LocaleMatcher {
    langs: Vec<String>,
    names: Vec<String>,
}

impl LocaleMatcher {
    pub fn new<L, N>(langs: L, names: N) -> Self
    where
        L: IntoIterator,
        L::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        Self {
            langs: langs.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
            names: names.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(&config.locale_langs, &config.locale_names)
    }
}

impl VoiceMatcher for LocaleMatcher {
    fn matches(&self, voice: &VoiceDescriptor) -> bool {
        let lang = voice.language.to_lowercase();
        let name = voice.name.to_lowercase();
        self.langs.iter().any(|m| lang.contains(m.as_str()))
            || self.names.iter().any(|m| name.contains(m.as_str()))
    }
}

/// Pick the first locale match, else the first voice. The flag is true when the
/// choice came from the matcher.
pub fn select_voice<'a>(
    voices: &'a [VoiceDescriptor],
    matcher: &dyn VoiceMatcher,
) -> Option<(&'a VoiceDescriptor, bool)> {
    voices
        .iter()
        .find(|v| matcher.matches(v))
        .map(|v| (v, true))
        .or_else(|| voices.first().map(|v| (v, false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices() -> Vec<VoiceDescriptor> {
        vec![
            VoiceDescriptor::new("en", "Samantha", "en-US"),
            VoiceDescriptor::new("yelda", "Yelda", "tr-TR"),
            VoiceDescriptor::new("de", "Anna", "de-DE"),
        ]
    }

    #[test]
    fn test_matches_language_tag() {
        let matcher = LocaleMatcher::from_config(&QueueConfig::default());
        let list = voices();
        let (voice, matched) = select_voice(&list, &matcher).unwrap();
        assert!(matched);
        assert_eq!(voice.name, "Yelda");
    }

    #[test]
    fn test_matches_name_case_insensitively() {
        let matcher = LocaleMatcher::from_config(&QueueConfig::default());
        let voice = VoiceDescriptor::new("g", "Google TÜRKÇE", "xx");
        assert!(matcher.matches(&voice));
        let voice = VoiceDescriptor::new("m", "Microsoft Turkish Desktop", "xx");
        assert!(matcher.matches(&voice));
    }

    #[test]
    fn test_falls_back_to_first_voice() {
        let matcher = LocaleMatcher::new(["ja"], ["japanese"]);
        let list = voices();
        let (voice, matched) = select_voice(&list, &matcher).unwrap();
        assert!(!matched);
        assert_eq!(voice.name, "Samantha");
    }

    #[test]
    fn test_empty_list_selects_nothing() {
        let matcher = LocaleMatcher::new(["tr"], Vec::<String>::new());
        assert!(select_voice(&[], &matcher).is_none());
    }

    #[test]
    fn test_closures_are_matchers() {
        let german = |v: &VoiceDescriptor| v.language.starts_with("de");
        let list = voices();
        let (voice, matched) = select_voice(&list, &german).unwrap();
        assert!(matched);
        assert_eq!(voice.name, "Anna");
    }
}
