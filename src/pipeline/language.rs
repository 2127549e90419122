//! Language adaptation
//!
//! Generation instructions are annotated with the session language before
//! the model call, and replies are normalized into speakable text after
//! it. Both operate on BCP 47 tags and fall back gracefully for tags not
//! in the table.

/// Human-readable name for a language tag's primary subtag
#[must_use]
pub fn language_name(tag: &str) -> Option<&'static str> {
    let primary = tag.split('-').next().unwrap_or(tag);
    match primary {
        "en" => Some("English"),
        "es" => Some("Spanish"),
        "fr" => Some("French"),
        "de" => Some("German"),
        "it" => Some("Italian"),
        "pt" => Some("Portuguese"),
        "nl" => Some("Dutch"),
        "ja" => Some("Japanese"),
        "ko" => Some("Korean"),
        "zh" => Some("Chinese"),
        "hi" => Some("Hindi"),
        "ar" => Some("Arabic"),
        _ => None,
    }
}

/// Annotate generation instructions with the session language.
///
/// English sessions pass through unchanged; everything else gets an
/// explicit respond-in directive so the model does not drift back to
/// English mid-call.
#[must_use]
pub fn annotate_instructions(instructions: &str, language: &str) -> String {
    let primary = language.split('-').next().unwrap_or(language);
    if primary == "en" || primary.is_empty() {
        return instructions.to_string();
    }

    let directive = language_name(language).map_or_else(
        || format!("Respond only in the language with tag '{language}'."),
        |name| format!("Respond only in {name}."),
    );

    if instructions.is_empty() {
        directive
    } else {
        format!("{instructions}\n\n{directive}")
    }
}

/// Normalize a generated reply into speakable text.
///
/// Chat models emit markdown habits that read badly over TTS; this strips
/// the common ones and collapses the text to single-space prose.
#[must_use]
pub fn post_process(text: &str, _language: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '`' | '_'))
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
