use remit_core::flows::{SessionState, Slots, Stage};

pub const UNSUPPORTED_MESSAGE: &str =
    "We've gone back and forth too many times to continue. Please start over.";
pub const EXECUTED_MESSAGE: &str = "Your transfer is complete. Anything else I can help with?";
pub const FAILED_MESSAGE: &str = "The transfer failed. Please try again in a moment.";
pub const CANCELLED_MESSAGE: &str = "The transfer was cancelled. Anything else I can help with?";
pub const ERROR_MESSAGE: &str = "Something went wrong, please try again.";
const EXTRAS_HINT: &str = "Would you like to add a memo or transfer date? If not, I'll go ahead.";

/// Formats an amount with thousands separators: `50000` → `50,000`.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if amount < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn describe(slots: &Slots) -> (String, String) {
    let amount = slots.amount.map(format_amount).unwrap_or_else(|| "?".to_owned());
    let target = slots.target.clone().unwrap_or_else(|| "?".to_owned());
    (amount, target)
}

/// Confirmation prompt shown when a transfer reaches READY.
pub fn ready_message(state: &SessionState) -> String {
    let (amount, target) = describe(&state.slots);
    let batch = &state.meta.batch;
    if batch.is_batch() {
        let prefix = if state.meta.last_cancelled {
            "Cancelled. Next, "
        } else if batch.progress > 0 {
            "Done! Next, "
        } else {
            ""
        };
        let lead = if prefix.is_empty() {
            format!("{} transfers requested. First, ", batch.total)
        } else {
            prefix.to_owned()
        };
        return format!(
            "{lead}send {amount} to {target}? ({}/{})",
            batch.current_index(),
            batch.total
        );
    }

    let mut message = format!("Send {amount} to {target}?");
    if state.slots.memo.is_none() && state.slots.transfer_date.is_none() {
        message.push('\n');
        message.push_str(EXTRAS_HINT);
    }
    message
}

/// Closing message once a transfer (or batch) reaches a terminal stage.
pub fn terminal_message(state: &SessionState) -> String {
    let executed = state.meta.batch.executed;
    match state.stage {
        Stage::Cancelled if executed > 0 => format!(
            "Sent {executed} transfer{} and cancelled the rest. Anything else I can help with?",
            if executed == 1 { "" } else { "s" }
        ),
        Stage::Executed if executed > 1 => {
            format!("All {executed} transfers are complete. Anything else I can help with?")
        }
        Stage::Executed => EXECUTED_MESSAGE.to_owned(),
        Stage::Failed => FAILED_MESSAGE.to_owned(),
        Stage::Cancelled => CANCELLED_MESSAGE.to_owned(),
        Stage::Unsupported => UNSUPPORTED_MESSAGE.to_owned(),
        _ => ERROR_MESSAGE.to_owned(),
    }
}
