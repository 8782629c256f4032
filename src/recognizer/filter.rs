//! # Hallucination Filter
//!
//! Pure classification of recognizer output as artifact vs. genuine text.
//! Whisper-family models reliably emit certain phrases on silent or noisy
//! audio (captioning credits, "thank you" variants, music labels) and
//! those must never reach clients as transcripts.
//!
//! This is a heuristic, lossy classifier: a real short utterance that looks
//! like an artifact will be dropped. That trade-off is accepted to suppress
//! a known failure mode on low-energy audio.

/// Known recognizer artifacts.
///
/// Entries shorter than [`EXACT_MATCH_MAX_LEN`] require an exact
/// (case-insensitive) match so that valid sentences containing them
/// survive; longer entries match as substrings anywhere in the text.
const HALLUCINATIONS: &[&str] = &[
    "Thank you.",
    "Thanks for watching.",
    "Thank you for watching.",
    "You",
    "MBC",
    "Amara.org",
    "Subtitles by",
    "Subtitles",
    "Copyright",
    "©",
    "The end",
    "Silence",
    "audio",
    "noise",
    "Music",
    "Violin music",
    "Eerie music",
    "Dramatic music",
    "Watching",
    "Sous-titres",
];

/// Blocklist entries under this length must match exactly.
const EXACT_MATCH_MAX_LEN: usize = 10;

/// Any text containing "thank you" below this total length is an artifact.
const THANK_YOU_MAX_LEN: usize = 20;

/// Classify recognizer output, returning `""` to signal "discard".
///
/// ## Policy (applied in order):
/// 1. Empty or whitespace-only input → discard
/// 2. Case-insensitive blocklist match (exact for short entries,
///    substring for long ones) → discard
/// 3. Short text containing "thank you" → discard (catches truncated
///    or garbled variants the exact list misses)
///
/// Anything else is returned trimmed and otherwise unchanged.
pub fn filter_hallucinations(text: &str) -> String {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return String::new();
    }

    let cleaned_lower = cleaned.to_lowercase();

    for entry in HALLUCINATIONS {
        let entry_lower = entry.to_lowercase();
        if entry_lower.len() < EXACT_MATCH_MAX_LEN {
            if cleaned_lower == entry_lower {
                return String::new();
            }
        } else if cleaned_lower.contains(&entry_lower) {
            return String::new();
        }
    }

    if cleaned_lower.contains("thank you") && cleaned_lower.len() < THANK_YOU_MAX_LEN {
        return String::new();
    }

    cleaned.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_whitespace_discarded() {
        assert_eq!(filter_hallucinations(""), "");
        assert_eq!(filter_hallucinations("   \t\n"), "");
    }

    #[test]
    fn test_exact_blocklist_matches() {
        assert_eq!(filter_hallucinations("Thank you."), "");
        assert_eq!(filter_hallucinations("thank you."), "");
        assert_eq!(filter_hallucinations("THANK YOU."), "");
        assert_eq!(filter_hallucinations("You"), "");
        assert_eq!(filter_hallucinations("you"), "");
        assert_eq!(filter_hallucinations("Silence"), "");
        assert_eq!(filter_hallucinations("  Music  "), "");
    }

    #[test]
    fn test_long_entries_match_as_substrings() {
        assert_eq!(filter_hallucinations("Subtitles by the Amara.org community"), "");
        assert_eq!(filter_hallucinations("thanks for watching. see you next time"), "");
        assert_eq!(filter_hallucinations("[eerie music playing]"), "");
    }

    #[test]
    fn test_short_entries_do_not_block_real_sentences() {
        // "You" is blocklisted, but only as an exact match
        assert_eq!(
            filter_hallucinations("You should see this"),
            "You should see this"
        );
        // "audio" and "noise" are exact-only too
        assert_eq!(
            filter_hallucinations("The audio cut out for a moment"),
            "The audio cut out for a moment"
        );
    }

    #[test]
    fn test_short_thank_you_variants_discarded() {
        assert_eq!(filter_hallucinations("thank you so much!!"), "");
        assert_eq!(filter_hallucinations("Thank you!"), "");
        assert_eq!(filter_hallucinations("uh thank you"), "");
    }

    #[test]
    fn test_long_thank_you_sentences_survive() {
        let text = "Thank you for joining the meeting today everyone";
        assert_eq!(filter_hallucinations(text), text);
    }

    #[test]
    fn test_genuine_text_passes_trimmed() {
        assert_eq!(
            filter_hallucinations("The weather today is sunny"),
            "The weather today is sunny"
        );
        assert_eq!(
            filter_hallucinations("  The weather today is sunny \n"),
            "The weather today is sunny"
        );
    }
}
