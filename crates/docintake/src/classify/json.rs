//! Pulling a JSON object out of free-form model output.

use serde_json::{Map, Value};

use crate::error::ClassifyError;

/// Returns the slice from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Result<&str, ClassifyError> {
    let start = text.find('{').ok_or(ClassifyError::NoJsonObject)?;
    let end = text.rfind('}').ok_or(ClassifyError::NoJsonObject)?;
    if end < start {
        return Err(ClassifyError::NoJsonObject);
    }
    Ok(&text[start..=end])
}

/// Light repair of near-JSON:
/// - trailing commas before `}` or `]` are removed;
/// - raw control characters inside strings are escaped;
/// - literal `\n` / `\r` / `\t` sequences outside strings become spaces.
pub fn repair_json(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
            } else {
                match c {
                    '\\' => {
                        out.push(c);
                        escaped = true;
                    }
                    '"' => {
                        out.push(c);
                        in_string = false;
                    }
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    _ => out.push(c),
                }
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '\\' if matches!(chars.get(i + 1), Some('n' | 'r' | 't')) => {
                out.push(' ');
                i += 1;
            }
            ',' => {
                let next = chars[i + 1..]
                    .iter()
                    .copied()
                    .find(|ch| !ch.is_whitespace() && !is_literal_escape_start(ch));
                if !matches!(next, Some('}' | ']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

/// Characters of a literal `\n` outside strings, which `repair_json` turns
/// into whitespace.
fn is_literal_escape_start(c: &char) -> bool {
    matches!(c, '\\' | 'n' | 'r' | 't')
}

/// Extracts, repairs and parses the JSON object in `text`.
pub fn parse_model_output(text: &str) -> Result<Map<String, Value>, ClassifyError> {
    let candidate = extract_json_object(text)?;

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(_) => serde_json::from_str(&repair_json(candidate))
            .map_err(|e| ClassifyError::MalformedJson(e.to_string()))?,
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ClassifyError::NotAnObject),
    }
}
