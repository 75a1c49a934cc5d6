//! Picking the target word out of a transcript

/// Words people say around the one they mean
const FILLERS: &[&str] = &[
    "a", "an", "the", "um", "uh", "er", "erm", "hmm", "like", "please", "word",
];

/// Extract the word to look up
///
/// Lowercases, strips punctuation from token ends and skips filler words.
/// If every token is a filler the last one is used, so "the word like"
/// gives "like". `None` means nothing usable was said.
#[must_use]
pub fn extract_word(transcript: &str) -> Option<String> {
    let tokens: Vec<String> = transcript
        .split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect();

    tokens
        .iter()
        .find(|token| !FILLERS.contains(&token.as_str()))
        .or_else(|| tokens.last())
        .cloned()
}
