//! Prompt canonicalization for stable prefix comparison

use regex::Regex;
use std::sync::LazyLock;

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?\b")
        .expect("timestamp pattern is valid")
});

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}\b",
    )
    .expect("uuid pattern is valid")
});

static RANDOM_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:nonce|request[_-]?id|session[_-]?id)[:=]\s*[A-Za-z0-9_-]{8,}\b")
        .expect("random id pattern is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Normalize a raw prompt into its canonical form.
///
/// Volatile substrings are replaced by fixed placeholders (`<ts>`, `<uuid>`,
/// `<id>`), escaped newlines become spaces and whitespace runs collapse to a
/// single space. The result is idempotent: canonicalizing it again returns it
/// unchanged.
pub fn canonicalize_prompt(prompt: &str) -> String {
    let mut text = canonical_pass(prompt);
    // Collapsing whitespace can join a timestamp that was split by a run of
    // spaces, so repeat until the text is stable. Every changing pass shortens it.
    loop {
        let next = canonical_pass(&text);
        if next == text {
            return text;
        }
        text = next;
    }
}

fn canonical_pass(prompt: &str) -> String {
    let text = prompt.trim().replace("\\n", " ");
    let text = TIMESTAMP.replace_all(&text, "<ts>");
    let text = UUID.replace_all(&text, "<uuid>");
    let text = RANDOM_ID.replace_all(&text, "<id>");
    WHITESPACE.replace_all(&text, " ").into_owned()
}
