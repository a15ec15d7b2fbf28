/// Hint value asking the engines to figure out the language themselves.
pub const AUTO: &str = "auto";

/// Language codes known to the multilingual Whisper tokenizer, in token order.
pub const WHISPER_LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv", "it",
    "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no", "th", "ur",
    "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr", "az", "sl", "kn",
    "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw", "gl", "mr", "pa", "si",
    "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu", "am", "yi", "lo", "uz", "fo",
    "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl", "mg", "as", "tt", "haw", "ln", "ha",
    "ba", "jw", "su",
];

fn is_auto(hint: &str) -> bool {
    hint.is_empty() || hint.eq_ignore_ascii_case(AUTO)
}

/// Maps a loose hint such as `uz-UZ` onto the ISO 639-1 code Whisper expects.
/// `None` leaves the language to Whisper's own detection.
pub fn whisper_language(hint: &str) -> Option<String> {
    let hint = hint.trim();
    if is_auto(hint) {
        return None;
    }
    let primary = hint.split(|c| c == '-' || c == '_').next().unwrap_or(hint);
    Some(primary.to_ascii_lowercase())
}

/// The cloud engine takes locale tags as they are; auto-detection is not offered there,
/// so `auto` becomes `default_locale`.
pub fn cloud_locale(hint: &str, default_locale: &str) -> String {
    let hint = hint.trim();
    if is_auto(hint) {
        default_locale.to_string()
    } else {
        hint.to_string()
    }
}
