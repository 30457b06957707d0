//! Deterministic utterance handling that must not depend on the LLM: confirm and cancel
//! shortcuts, and the UI's "edit and confirm" messages.

use remit_core::flows::{Delta, Operation, SlotName};
use serde_json::Value;

const CONFIRM_PHRASES: &[&str] = &[
    "yes",
    "y",
    "yeah",
    "yep",
    "ok",
    "okay",
    "confirm",
    "sure",
    "go ahead",
    "proceed",
    "send it",
    "do it",
    "correct",
    "sounds good",
    "yes please",
    "yes send it",
];

const CANCEL_PHRASES: &[&str] = &[
    "cancel",
    "stop",
    "never mind",
    "nevermind",
    "forget it",
    "don't send",
    "do not send",
    "abort",
];

const CANCEL_WORDS: &[&str] = &["no", "nope", "nah"];

/// True when the whole utterance is an affirmative.
pub fn is_confirm(text: &str) -> bool {
    let tokens = tokenize(&normalize_text(text));
    if tokens.is_empty() {
        return false;
    }
    let joined = tokens.join(" ");
    CONFIRM_PHRASES.contains(&joined.as_str())
}

/// True when the utterance asks to stop the current transfer.
pub fn is_cancel(text: &str) -> bool {
    let tokens = tokenize(&normalize_text(text));
    if tokens.len() == 1 && CANCEL_WORDS.contains(&tokens[0].as_str()) {
        return true;
    }
    CANCEL_PHRASES.iter().any(|phrase| contains_phrase(&tokens, phrase))
}

/// Parses `"<label> <value>, <label> <value> and confirm"` into set operations followed by
/// `confirm`. Returns `None` for anything else.
pub fn parse_slot_edit_confirm(text: &str) -> Option<Delta> {
    let trimmed = text.trim().trim_end_matches(['.', '!']);
    let lowered = trimmed.to_ascii_lowercase();
    let body_len = lowered.strip_suffix("and confirm")?.len();
    let body = trimmed[..body_len].trim().trim_end_matches(',');

    // Commas also appear inside amounts ("30,000"), so a piece without a label continues the
    // previous field.
    let mut fields: Vec<String> = Vec::new();
    for piece in body.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match fields.last_mut() {
            Some(previous) if split_label(piece).is_none() => {
                previous.push(',');
                previous.push_str(piece);
            }
            _ => fields.push(piece.to_owned()),
        }
    }

    let mut operations = Vec::new();
    for field in &fields {
        let (slot, value) = split_label(field)?;
        operations.push(Operation::set(slot.as_str(), slot_value(slot, value)));
    }
    if operations.is_empty() {
        return None;
    }
    operations.push(Operation::confirm());
    Some(Delta::new(operations))
}

/// Reads amounts as typed in UI messages: `50,000`, `$50,000`, `50000 won`.
pub fn parse_amount_text(text: &str) -> Option<i64> {
    let lowered = text.trim().to_ascii_lowercase();
    let stripped = lowered.trim_start_matches('$').trim_end_matches("won").trim();
    let digits: String = stripped.chars().filter(|character| *character != ',').collect();
    if digits.is_empty() || !digits.chars().all(|character| character.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn split_label(part: &str) -> Option<(SlotName, &str)> {
    let lowered = part.to_ascii_lowercase();
    let mut labels: Vec<(&str, SlotName)> =
        SlotName::ALL.iter().map(|slot| (slot.label(), *slot)).collect();
    labels.push(("date", SlotName::TransferDate));
    labels.push(("recipient name", SlotName::Target));
    labels.sort_by_key(|(label, _)| std::cmp::Reverse(label.len()));

    labels.into_iter().find_map(|(label, slot)| {
        let rest = lowered.strip_prefix(label)?;
        if !rest.starts_with([' ', ':']) {
            return None;
        }
        let value = part[label.len()..].trim_start_matches([' ', ':']).trim();
        (!value.is_empty()).then_some((slot, value))
    })
}

fn slot_value(slot: SlotName, raw: &str) -> Value {
    match slot {
        SlotName::Amount => match parse_amount_text(raw) {
            Some(amount) => Value::from(amount),
            None => Value::from(raw),
        },
        _ => Value::from(raw),
    }
}

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase().replace('\u{2019}', "'")
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == '\'' {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() || words.len() > tokens.len() {
        return false;
    }
    tokens.windows(words.len()).any(|window| {
        window.iter().zip(&words).all(|(token, word)| token.as_str() == *word)
    })
}
