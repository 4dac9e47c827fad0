use serde_json::Value;
use std::collections::HashMap;

use shared_utils::template::render_template;

use crate::error::ConversationError;

/// Named reply templates, pt-BR. A deployment may override any of them; the
/// state graph references templates strictly by name and an unknown name is
/// a runtime error surfaced at graph validation.
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        let mut templates = HashMap::new();
        let mut add = |name: &str, body: &str| {
            templates.insert(name.to_string(), body.to_string());
        };

        add(
            "menu_welcome",
            "Olá! Que bom te ver por aqui. 💇‍♀️\n\
             1) Agendar um serviço\n\
             2) Informações sobre o salão\n\
             Responda com o número da opção.",
        );
        add(
            "invalid_option",
            "Não entendi. 😅 Responda com:\n1) Agendar\n2) Informações",
        );
        add(
            "confirm_intent",
            "Só para confirmar: você quer agendar um horário?\n\
             1) Sim, quero agendar\n\
             2) Não, quero informações",
        );
        add(
            "clarify_service",
            "Qual serviço você deseja agendar? Me diga algo mais específico, \
             por exemplo:\n{{top3.formatted}}",
        );
        add(
            "validation_failed",
            "Esse horário não está disponível. 😕 Vamos tentar outro serviço ou horário?",
        );
        add(
            "suggested_times",
            "Tenho estes horários próximos: {{validation.suggested_formatted}}",
        );
        add(
            "info_response",
            "Funcionamos de terça a sábado, das 9h às 19h. \
             Pagamentos em dinheiro, pix e cartão. Se quiser agendar, é só mandar um \"1\"!",
        );
        add(
            "human_handoff_active",
            "Uma atendente humana já está cuidando do seu atendimento. \
             Você pode continuar a conversa por aqui. 💁‍♀️",
        );
        add(
            "scheduling_confirmed",
            "Anotei aqui: {{slots.service_name}}! ✨ Em breve confirmamos os \
             detalhes do seu horário.",
        );
        add(
            "apology_error",
            "Desculpa, tive um problema aqui do meu lado. \
             Pode mandar sua mensagem de novo?",
        );

        Self { templates }
    }
}

impl TemplateRegistry {
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.templates.extend(overrides);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn render(&self, name: &str, scope: &Value) -> Result<String, ConversationError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ConversationError::UnknownTemplate(name.to_string()))?;
        Ok(render_template(template, scope))
    }
}
