use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared_models::types::normalize_phone;

/// Anything longer than this is not a human typing a booking request.
const MAX_TEXT_CHARS: usize = 4096;

/// One webhook delivery from the WhatsApp gateway. The gateway batches, so
/// `data` may be a single message object or an array of them.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub event: String,
    /// Gateway instance name; doubles as the tenant when present.
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// What the core consumes per contained message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub tenant: String,
    pub phone: String,
    pub text: String,
    pub message_id: String,
    pub display_name: Option<String>,
}

impl WebhookEnvelope {
    /// Extracts every usable message: normalized phone, concatenated text
    /// variants, provider message id and optional display name. Messages
    /// sent by the bot itself (`fromMe`) and non-text payloads are skipped.
    pub fn extract_messages(&self, tenant_default: &str) -> Vec<InboundMessage> {
        let tenant = self
            .instance
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| tenant_default.to_string());

        let entries: Vec<&Value> = match &self.data {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![&self.data],
            _ => Vec::new(),
        };

        entries
            .iter()
            .filter_map(|entry| Self::extract_one(entry, &tenant))
            .collect()
    }

    fn extract_one(entry: &Value, tenant: &str) -> Option<InboundMessage> {
        let key = entry.get("key")?;
        if key.get("fromMe").and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }

        let phone = normalize_phone(key.get("remoteJid")?.as_str()?)?;
        let message_id = key.get("id")?.as_str()?.to_string();

        let text = Self::concat_text_variants(entry.get("message")?);
        if text.is_empty() || text.chars().count() > MAX_TEXT_CHARS {
            return None;
        }

        let display_name = entry
            .get("pushName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Some(InboundMessage {
            tenant: tenant.to_string(),
            phone,
            text,
            message_id,
            display_name,
        })
    }

    /// The gateway spreads text over several shapes depending on the client;
    /// all present variants are concatenated in a fixed order.
    fn concat_text_variants(message: &Value) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(text) = message.get("conversation").and_then(Value::as_str) {
            parts.push(text.to_string());
        }
        if let Some(text) = message
            .pointer("/extendedTextMessage/text")
            .and_then(Value::as_str)
        {
            parts.push(text.to_string());
        }
        if let Some(text) = message
            .pointer("/imageMessage/caption")
            .and_then(Value::as_str)
        {
            parts.push(text.to_string());
        }

        parts.retain(|p| !p.trim().is_empty());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(data: Value) -> WebhookEnvelope {
        WebhookEnvelope {
            event: "messages.upsert".to_string(),
            instance: Some("tenant-a".to_string()),
            data,
        }
    }

    #[test]
    fn extracts_single_message() {
        let env = envelope(json!({
            "key": { "remoteJid": "5511999999999@s.whatsapp.net", "id": "MSG1", "fromMe": false },
            "pushName": "Maria",
            "message": { "conversation": "Oi" }
        }));

        let messages = env.extract_messages("default");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tenant, "tenant-a");
        assert_eq!(messages[0].phone, "5511999999999");
        assert_eq!(messages[0].text, "Oi");
        assert_eq!(messages[0].message_id, "MSG1");
        assert_eq!(messages[0].display_name.as_deref(), Some("Maria"));
    }

    #[test]
    fn concatenates_text_variants() {
        let env = envelope(json!({
            "key": { "remoteJid": "5511999999999@s.whatsapp.net", "id": "MSG2" },
            "message": {
                "conversation": "Quero agendar",
                "extendedTextMessage": { "text": "um corte" }
            }
        }));

        let messages = env.extract_messages("default");
        assert_eq!(messages[0].text, "Quero agendar um corte");
    }

    #[test]
    fn skips_own_and_textless_messages() {
        let env = envelope(json!([
            {
                "key": { "remoteJid": "5511999999999@s.whatsapp.net", "id": "A", "fromMe": true },
                "message": { "conversation": "resposta do bot" }
            },
            {
                "key": { "remoteJid": "5511888888888@s.whatsapp.net", "id": "B" },
                "message": { "audioMessage": { "seconds": 5 } }
            },
            {
                "key": { "remoteJid": "5511777777777@s.whatsapp.net", "id": "C" },
                "message": { "conversation": "válida" }
            }
        ]));

        let messages = env.extract_messages("default");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "C");
    }

    #[test]
    fn falls_back_to_default_tenant() {
        let mut env = envelope(json!({
            "key": { "remoteJid": "5511999999999@s.whatsapp.net", "id": "MSG3" },
            "message": { "conversation": "Oi" }
        }));
        env.instance = None;

        let messages = env.extract_messages("default");
        assert_eq!(messages[0].tenant, "default");
    }

    #[test]
    fn rejects_unparsable_phone() {
        let env = envelope(json!({
            "key": { "remoteJid": "status@broadcast", "id": "MSG4" },
            "message": { "conversation": "Oi" }
        }));
        assert!(env.extract_messages("default").is_empty());
    }
}
