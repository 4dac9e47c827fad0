use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use catalog_cell::ServiceSuggestion;

pub const STATE_START: &str = "START";
pub const STATE_HUMAN_HANDOFF: &str = "HUMAN_HANDOFF";
pub const STATE_MENU_WAITING: &str = "MENU_WAITING";
pub const STATE_CONFIRM_INTENT: &str = "CONFIRM_INTENT";
pub const STATE_SCHEDULING_ROUTING: &str = "SCHEDULING_ROUTING";
pub const STATE_VALIDATE: &str = "VALIDATE_BEFORE_CONFIRM";
pub const STATE_INFO_ROUTING: &str = "INFO_ROUTING";
pub const STATE_CONFIRMED: &str = "SCHEDULING_CONFIRMED";

const HISTORY_CAP: usize = 20;

/// Slot map the state graph reads and the controller fills.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slots {
    pub service_id: Option<i64>,
    pub service_name: Option<String>,
    pub professional_id: Option<i64>,
    pub start_iso: Option<String>,
    pub raw_query: Option<String>,
    pub category: Option<String>,
    pub validation: Option<Value>,
    #[serde(default)]
    pub top3: Vec<ServiceSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Per `(tenant, phone)` conversation state. Mutated only by the controller
/// under the per-phone lock; serialized as one blob with a 2 h TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub tenant: String,
    pub phone: String,
    pub conversation_id: Uuid,
    pub state: String,
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// The current aggregated inbound message; not persisted long-term but
    /// carried so templates and expressions can reference it.
    #[serde(default)]
    pub raw_message: String,
    pub last_activity: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(tenant: &str, phone: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            phone: phone.to_string(),
            conversation_id: Uuid::new_v4(),
            state: STATE_START.to_string(),
            slots: Slots::default(),
            vars: HashMap::new(),
            history: Vec::new(),
            raw_message: String::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn push_history(&mut self, role: &str, text: &str) {
        self.history.push(HistoryEntry {
            role: role.to_string(),
            text: text.to_string(),
            at: Utc::now(),
        });
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(0..excess);
        }
    }

    /// The variable scope expressions and templates evaluate against. NLP
    /// flags and tool results (vars) sit at the root; slots keep their own
    /// namespace and the most used ones are mirrored at the root.
    pub fn scope(&self) -> Value {
        let mut root = Map::new();
        for (name, value) in &self.vars {
            root.insert(name.clone(), value.clone());
        }
        root.insert("state".to_string(), json!(self.state));
        root.insert("phone".to_string(), json!(self.phone));
        root.insert("raw_message".to_string(), json!(self.raw_message));
        root.insert(
            "raw_query".to_string(),
            json!(self.slots.raw_query.clone().unwrap_or_default()),
        );
        root.insert("service_id".to_string(), json!(self.slots.service_id));
        root.insert(
            "category".to_string(),
            self.slots
                .category
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        root.insert(
            "slots".to_string(),
            serde_json::to_value(&self.slots).unwrap_or(Value::Null),
        );
        Value::Object(root)
    }
}

/// What `ProcessMessage` hands back to the webhook layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub reply: Option<String>,
    pub action: String,
}

impl ConversationResponse {
    pub fn buffered() -> Self {
        Self {
            reply: None,
            action: "buffered".to_string(),
        }
    }

    pub fn answered(reply: String) -> Self {
        Self {
            reply: Some(reply),
            action: "answered".to_string(),
        }
    }

    pub fn transfer_human(reply: String) -> Self {
        Self {
            reply: Some(reply),
            action: "transfer_human".to_string(),
        }
    }

    pub fn silent(action: &str) -> Self {
        Self {
            reply: None,
            action: action.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_capped_at_twenty() {
        let mut ctx = ConversationContext::new("default", "5511999999999");
        for i in 0..30 {
            ctx.push_history("user", &format!("m{}", i));
        }
        assert_eq!(ctx.history.len(), 20);
        assert_eq!(ctx.history[0].text, "m10");
    }

    #[test]
    fn scope_exposes_slots_and_flags() {
        let mut ctx = ConversationContext::new("default", "5511999999999");
        ctx.slots.raw_query = Some("corte".to_string());
        ctx.slots.service_id = Some(42);
        ctx.set_var("option_1", json!(true));

        let scope = ctx.scope();
        assert_eq!(scope["raw_query"], json!("corte"));
        assert_eq!(scope["service_id"], json!(42));
        assert_eq!(scope["option_1"], json!(true));
        assert_eq!(scope["slots"]["service_id"], json!(42));
    }

    #[test]
    fn context_roundtrips_through_json() {
        let mut ctx = ConversationContext::new("default", "5511999999999");
        ctx.state = STATE_MENU_WAITING.to_string();
        ctx.slots.category = Some("cabelo".to_string());

        let raw = serde_json::to_string(&ctx).unwrap();
        let back: ConversationContext = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.state, STATE_MENU_WAITING);
        assert_eq!(back.slots.category.as_deref(), Some("cabelo"));
        assert_eq!(back.conversation_id, ctx.conversation_id);
    }
}
