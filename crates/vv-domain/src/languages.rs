//! Supported transcription languages
//!
//! The Whisper multilingual set (ISO 639-1 codes, plus `yue`), with `auto`
//! for provider-side detection. Providers that support fewer languages
//! still validate against this table and fail at dispatch if the backend
//! rejects the code.

/// All supported language codes. `auto` is always first.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "auto", "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar",
    "sv", "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta",
    "no", "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn",
    "sr", "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq",
    "sw", "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd",
    "gu", "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo",
    "tl", "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su", "yue",
];

/// Whether a language code is in the supported table.
pub fn is_supported(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_whisper_set() {
        assert!(SUPPORTED_LANGUAGES.len() >= 99);
        for code in ["auto", "en", "sl", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh"] {
            assert!(is_supported(code), "missing language: {code}");
        }
    }

    #[test]
    fn table_has_no_duplicates() {
        let mut seen = std::collections::BTreeSet::new();
        for code in SUPPORTED_LANGUAGES {
            assert!(seen.insert(code), "duplicate language: {code}");
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(!is_supported("xx"));
        assert!(!is_supported("english"));
    }
}
