//! Free-text command parsing.
//!
//! Turns a raw command string into `{action, parameters}`. Pure syntax only;
//! no action is validated here.

use aman_core::types::{ParamMap, ParsedCommand};

/// Parse a raw command string.
///
/// Returns `None` for whitespace-only input, which the dispatcher silently
/// ignores. Tokenizes on unquoted whitespace; single or double quotes open a
/// span that suppresses splitting until the matching quote. An unterminated
/// quote consumes to end of string rather than erroring.
pub fn parse(raw: &str) -> Option<ParsedCommand> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let tokens = tokenize(trimmed);
    let mut iter = tokens.into_iter();
    let action = iter.next()?.to_lowercase();

    let mut parameters = ParamMap::new();
    for token in iter {
        apply_token(&mut parameters, &token);
    }

    Some(ParsedCommand {
        action,
        parameters,
        raw_text: trimmed.to_string(),
    })
}

/// Split on unquoted whitespace, honoring '…' and "…" spans.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Interpret one token as a parameter.
///
/// `key=value` tokens split on the first `=`. Keyless tokens are classified
/// by content in priority order: flag, phone number, URL, free text. Each
/// positional slot only fills once.
fn apply_token(parameters: &mut ParamMap, token: &str) {
    if let Some(eq) = token.find('=') {
        let key = token[..eq].trim();
        let value = token[eq + 1..].trim();
        if !key.is_empty() {
            parameters.insert(key, value);
            return;
        }
    }

    if let Some(name) = token.strip_prefix("--").or_else(|| token.strip_prefix('-')) {
        if !name.is_empty() && !name.chars().all(|c| c.is_ascii_digit()) {
            parameters.insert(name, "true");
            return;
        }
    }

    if is_phone_number(token) {
        if !parameters.contains_key("to") {
            parameters.insert("to", normalize_phone(token));
        }
        return;
    }

    if is_url(token) {
        if !parameters.contains_key("url") {
            parameters.insert("url", token);
        }
        return;
    }

    if !parameters.contains_key("message") {
        parameters.insert("message", token);
    }
}

/// E.164-ish check: optional `+`, then 10-15 digits, after stripping
/// spaces, dashes, and parentheses.
pub fn is_phone_number(value: &str) -> bool {
    let cleaned = normalize_phone(value);
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && (10..=15).contains(&digits.len())
}

fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect()
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://") || value.starts_with("ftp://")
}
