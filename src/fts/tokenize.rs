//! Identifier-aware tokenizer shared by the index builder and the query path.
//!
//! Extracts `[A-Za-z0-9_]+` runs, lower-cases them, and additionally emits
//! camelCase / snake_case sub-tokens so that `GetUserById` is findable via
//! `get`, `user`, `by` and `id` as well as the full identifier. Tokens shorter
//! than two characters are dropped.

const MIN_TOKEN_LEN: usize = 2;

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for run in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if run.is_empty() {
            continue;
        }
        let full = run.to_lowercase();
        if full.len() >= MIN_TOKEN_LEN {
            tokens.push(full.clone());
        }
        let parts = split_identifier(run);
        // A single part equal to the full token would double-count it.
        if parts.len() > 1 {
            for part in parts {
                let part = part.to_lowercase();
                if part.len() >= MIN_TOKEN_LEN && part != full {
                    tokens.push(part);
                }
            }
        }
    }
    tokens
}

/// Split an identifier at underscores and case transitions.
/// `HTTPServer` yields `["HTTP", "Server"]`, `get_user` yields
/// `["get", "user"]`, `getUserById` yields `["get", "User", "By", "Id"]`.
fn split_identifier(run: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for piece in run.split('_') {
        if piece.is_empty() {
            continue;
        }
        let bytes = piece.as_bytes();
        let mut start = 0;
        for i in 1..bytes.len() {
            let prev = bytes[i - 1] as char;
            let cur = bytes[i] as char;
            let next_lower = bytes
                .get(i + 1)
                .map(|&b| (b as char).is_ascii_lowercase())
                .unwrap_or(false);
            let boundary = (cur.is_ascii_uppercase() && !prev.is_ascii_uppercase())
                || (cur.is_ascii_uppercase() && prev.is_ascii_uppercase() && next_lower);
            if boundary {
                parts.push(&piece[start..i]);
                start = i;
            }
        }
        parts.push(&piece[start..]);
    }
    parts
}
