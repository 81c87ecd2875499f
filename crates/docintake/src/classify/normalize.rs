use serde_json::Value;

use crate::model::UNCLASSIFIED;

/// Canonicalizes a category returned by the model.
///
/// Keeps the text before the first `/` or `(`, title-cases each word,
/// collapses whitespace and strips trailing characters that are not
/// letters, digits or combining diacritics. Applying it twice gives the
/// same result as applying it once.
pub fn normalize_category(raw: &str) -> String {
    let head = raw.split(['/', '(']).next().unwrap_or_default();

    let titled = head
        .split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ");

    let trimmed = titled.trim_end_matches(|c: char| !is_kept_trailing(c));

    if trimmed.is_empty() {
        UNCLASSIFIED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalizes a raw JSON value; anything but a string is unclassified.
pub fn normalize_category_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => normalize_category(s),
        _ => UNCLASSIFIED.to_string(),
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let mut out = String::with_capacity(word.len());
    let mut upper = first.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => out.push(u),
        _ => out.push(first),
    }
    for c in chars {
        out.extend(c.to_lowercase());
    }
    out
}

fn is_kept_trailing(c: char) -> bool {
    c.is_alphanumeric() || ('\u{0300}'..='\u{036F}').contains(&c)
}
