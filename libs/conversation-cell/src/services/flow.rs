use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ConversationError;
use crate::services::expr::Expr;

/// Raw YAML shape. Unknown action names fail deserialization, and
/// everything else that can be checked statically is checked in `compile`.
#[derive(Debug, Deserialize)]
struct RawFlow {
    initial: String,
    states: Vec<RawState>,
}

#[derive(Debug, Deserialize)]
struct RawState {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stay: bool,
    #[serde(default)]
    on_enter: Vec<RawAction>,
    #[serde(default)]
    on_user_message: Vec<RawAction>,
    #[serde(default)]
    on_user_message_or_slots: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RawAction {
    Reply {
        template: String,
        #[serde(default)]
        condition: Option<String>,
    },
    Transition {
        target: String,
        #[serde(default)]
        condition: Option<String>,
    },
    CheckOverride {
        var: String,
        #[serde(default)]
        condition: Option<String>,
    },
    AggregateBuffer {
        #[serde(default)]
        condition: Option<String>,
    },
    SetVariable {
        name: String,
        value: Value,
        #[serde(default)]
        condition: Option<String>,
    },
    CallTool {
        tool: String,
        #[serde(default)]
        args: Value,
        save_as: String,
        #[serde(default)]
        condition: Option<String>,
    },
}

/// One compiled action: the variant payload plus its parsed guard.
#[derive(Debug, Clone)]
pub struct CompiledAction {
    pub kind: ActionKind,
    pub condition: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Reply { template: String },
    Transition { target: String },
    CheckOverride { var: String },
    AggregateBuffer,
    SetVariable { name: String, value: Value },
    CallTool { tool: String, args: Value, save_as: String },
}

#[derive(Debug, Clone)]
pub struct StateNode {
    pub name: String,
    pub description: Option<String>,
    pub stay: bool,
    pub on_enter: Vec<CompiledAction>,
    pub on_user_message: Vec<CompiledAction>,
    /// True when the message list also fires on slot updates (the
    /// `on_user_message_or_slots` trigger).
    pub reacts_to_slots: bool,
}

/// The validated, materialized state graph.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    pub initial: String,
    states: HashMap<String, StateNode>,
}

impl FlowDefinition {
    pub fn from_yaml(raw: &str) -> Result<Self, ConversationError> {
        let parsed: RawFlow = serde_yaml::from_str(raw)
            .map_err(|e| ConversationError::FlowDefinition(e.to_string()))?;
        Self::compile(parsed)
    }

    pub fn from_file(path: &str) -> Result<Self, ConversationError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConversationError::FlowDefinition(format!("{}: {}", path, e)))?;
        Self::from_yaml(&raw)
    }

    /// The flow shipped with the binary; used when no flow file is
    /// configured. Validated by tests, hence the expect.
    pub fn built_in() -> Self {
        Self::from_yaml(include_str!("../../flows/atendimento.yaml"))
            .expect("embedded flow definition is valid")
    }

    pub fn state(&self, name: &str) -> Result<&StateNode, ConversationError> {
        self.states
            .get(name)
            .ok_or_else(|| ConversationError::UnknownState(name.to_string()))
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn state_names(&self) -> Vec<&str> {
        self.states.keys().map(|s| s.as_str()).collect()
    }

    /// Every template / tool referenced, for validation against the
    /// registries at startup.
    pub fn referenced_templates(&self) -> Vec<&str> {
        self.all_actions()
            .filter_map(|action| match &action.kind {
                ActionKind::Reply { template } => Some(template.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn referenced_tools(&self) -> Vec<&str> {
        self.all_actions()
            .filter_map(|action| match &action.kind {
                ActionKind::CallTool { tool, .. } => Some(tool.as_str()),
                _ => None,
            })
            .collect()
    }

    fn all_actions(&self) -> impl Iterator<Item = &CompiledAction> {
        self.states.values().flat_map(|state| {
            state
                .on_enter
                .iter()
                .chain(state.on_user_message.iter())
        })
    }

    fn compile(raw: RawFlow) -> Result<Self, ConversationError> {
        let mut states = HashMap::new();
        for raw_state in raw.states {
            if !raw_state.on_user_message.is_empty()
                && !raw_state.on_user_message_or_slots.is_empty()
            {
                return Err(ConversationError::FlowDefinition(format!(
                    "state {} declares both message triggers",
                    raw_state.name
                )));
            }

            let reacts_to_slots = !raw_state.on_user_message_or_slots.is_empty();
            let message_actions = if reacts_to_slots {
                raw_state.on_user_message_or_slots
            } else {
                raw_state.on_user_message
            };

            let node = StateNode {
                name: raw_state.name.clone(),
                description: raw_state.description,
                stay: raw_state.stay,
                on_enter: compile_actions(raw_state.on_enter)?,
                on_user_message: compile_actions(message_actions)?,
                reacts_to_slots,
            };
            if states.insert(raw_state.name.clone(), node).is_some() {
                return Err(ConversationError::FlowDefinition(format!(
                    "duplicate state {}",
                    raw_state.name
                )));
            }
        }

        let flow = Self {
            initial: raw.initial,
            states,
        };

        if !flow.has_state(&flow.initial) {
            return Err(ConversationError::FlowDefinition(format!(
                "initial state {} is not defined",
                flow.initial
            )));
        }
        for state in flow.states.values() {
            for action in state.on_enter.iter().chain(state.on_user_message.iter()) {
                if let ActionKind::Transition { target } = &action.kind {
                    if !flow.has_state(target) {
                        return Err(ConversationError::FlowDefinition(format!(
                            "state {} transitions to unknown state {}",
                            state.name, target
                        )));
                    }
                }
            }
        }

        Ok(flow)
    }
}

fn compile_actions(raw: Vec<RawAction>) -> Result<Vec<CompiledAction>, ConversationError> {
    raw.into_iter().map(compile_action).collect()
}

fn compile_action(raw: RawAction) -> Result<CompiledAction, ConversationError> {
    let (kind, condition) = match raw {
        RawAction::Reply { template, condition } => (ActionKind::Reply { template }, condition),
        RawAction::Transition { target, condition } => {
            (ActionKind::Transition { target }, condition)
        }
        RawAction::CheckOverride { var, condition } => (ActionKind::CheckOverride { var }, condition),
        RawAction::AggregateBuffer { condition } => (ActionKind::AggregateBuffer, condition),
        RawAction::SetVariable {
            name,
            value,
            condition,
        } => (ActionKind::SetVariable { name, value }, condition),
        RawAction::CallTool {
            tool,
            args,
            save_as,
            condition,
        } => (
            ActionKind::CallTool {
                tool,
                args,
                save_as,
            },
            condition,
        ),
    };

    let condition = condition.map(|raw| Expr::parse(&raw)).transpose()?;
    Ok(CompiledAction { kind, condition })
}
