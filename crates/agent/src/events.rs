//! Turn progress events and the terminal reply payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use remit_core::flows::Slots;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    #[default]
    Ask,
    Confirm,
    Done,
    AskContinue,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ASK",
            Self::Confirm => "CONFIRM",
            Self::Done => "DONE",
            Self::AskContinue => "ASK_CONTINUE",
        }
    }

    /// Buttons the client should render for this action.
    pub fn ui_hint(self) -> UiHint {
        let buttons: &[&str] = match self {
            Self::AskContinue => &["Continue", "Cancel"],
            Self::Confirm => &["Confirm", "Cancel"],
            Self::Ask | Self::Done => &[],
        };
        UiHint { buttons: buttons.iter().map(|label| (*label).to_owned()).collect() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiHint {
    #[serde(default)]
    pub buttons: Vec<String>,
}

/// A named post-turn hook declared by a flow handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookCall {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl HookCall {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data }
    }
}

/// Body of the single terminal event of a turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DonePayload {
    pub message: String,
    pub next_action: NextAction,
    #[serde(default)]
    pub ui_hint: UiHint,
    #[serde(default)]
    pub state_snapshot: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Slots>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts: Option<Vec<Slots>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots_card: Option<Slots>,
}

impl DonePayload {
    pub fn new(message: impl Into<String>, next_action: NextAction) -> Self {
        Self {
            message: message.into(),
            next_action,
            ui_hint: next_action.ui_hint(),
            ..Self::default()
        }
    }

    pub fn with_hook(mut self, hook: HookCall) -> Self {
        self.hooks.push(hook);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnEvent {
    AgentStart {
        agent: String,
        label: String,
    },
    AgentDone {
        agent: String,
        label: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
    },
    LlmToken {
        text: String,
    },
    LlmDone {
        result: Value,
    },
    TaskProgress {
        index: usize,
        total: usize,
        slots: Slots,
    },
    Done {
        payload: DonePayload,
    },
}

impl TurnEvent {
    pub fn agent_start(agent: impl Into<String>, label: impl Into<String>) -> Self {
        Self::AgentStart { agent: agent.into(), label: label.into() }
    }

    pub fn agent_done(agent: impl Into<String>, label: impl Into<String>, success: bool) -> Self {
        Self::AgentDone {
            agent: agent.into(),
            label: label.into(),
            success,
            stage: None,
            retry_count: None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Sending half of a turn's event stream.
///
/// Cloneable; all clones share the terminal-event latch, so at most one `Done` is delivered.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TurnEvent>>,
    done: Arc<AtomicBool>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx), done: Arc::new(AtomicBool::new(false)) }, rx)
    }

    /// A sink that drops progress events. Used by the non-streaming entry point.
    pub fn disabled() -> Self {
        Self { tx: None, done: Arc::new(AtomicBool::new(false)) }
    }

    pub async fn emit(&self, event: TurnEvent) {
        if event.is_done() && self.done.swap(true, Ordering::SeqCst) {
            debug!(event_name = "turn.duplicate_done_suppressed", "terminal event already sent");
            return;
        }
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            debug!(event_name = "turn.event_dropped", "event receiver closed");
        }
    }

    /// Sends the terminal event. Returns false when one was already sent.
    pub async fn done(&self, payload: DonePayload) -> bool {
        if self.done_sent() {
            return false;
        }
        self.emit(TurnEvent::Done { payload }).await;
        true
    }

    pub fn done_sent(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::events::{DonePayload, EventSink, NextAction, TurnEvent};

    #[test]
    fn next_action_maps_to_buttons() {
        assert_eq!(NextAction::Confirm.ui_hint().buttons, vec!["Confirm", "Cancel"]);
        assert_eq!(NextAction::AskContinue.ui_hint().buttons, vec!["Continue", "Cancel"]);
        assert!(NextAction::Ask.ui_hint().buttons.is_empty());
        assert!(NextAction::Done.ui_hint().buttons.is_empty());
    }

    #[test]
    fn events_serialize_with_screaming_tags() {
        let event = TurnEvent::agent_start("slot", "Reading transfer details");
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({"event": "AGENT_START", "agent": "slot", "label": "Reading transfer details"})
        );

        let done = TurnEvent::Done { payload: DonePayload::new("ok", NextAction::Done) };
        let value = serde_json::to_value(&done).expect("serialize");
        assert_eq!(value["event"], "DONE");
        assert_eq!(value["payload"]["next_action"], "DONE");
    }

    #[tokio::test]
    async fn only_first_done_is_delivered() {
        let (sink, mut rx) = EventSink::channel(8);
        let clone = sink.clone();

        assert!(sink.done(DonePayload::new("first", NextAction::Done)).await);
        assert!(!clone.done(DonePayload::new("second", NextAction::Done)).await);
        clone.emit(TurnEvent::Done { payload: DonePayload::new("third", NextAction::Ask) }).await;
        drop(sink);
        drop(clone);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            TurnEvent::Done { payload } if payload.message == "first"
        ));
    }
}
