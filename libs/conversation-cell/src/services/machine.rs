use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

use shared_utils::template::{lookup_path, render_template};

use crate::error::ConversationError;
use crate::models::ConversationContext;
use crate::services::expr::ExprPredicates;
use crate::services::flow::{ActionKind, CompiledAction, FlowDefinition};
use crate::services::handoff::HandoffService;
use crate::services::nlp::Analyzer;
use crate::services::tools::ToolRegistry;
use crate::templates::TemplateRegistry;

const MAX_TRANSITION_DEPTH: usize = 8;

#[derive(Debug, Default)]
pub struct MachineOutcome {
    pub replies: Vec<String>,
    /// States entered during this step, in order.
    pub entered: Vec<String>,
}

impl MachineOutcome {
    pub fn entered_state(&self, name: &str) -> bool {
        self.entered.iter().any(|s| s == name)
    }
}

struct AnalyzerPredicates<'a> {
    analyzer: &'a Analyzer,
}

impl ExprPredicates for AnalyzerPredicates<'_> {
    fn is_ambiguous(&self, text: &str) -> bool {
        self.analyzer.is_ambiguous_phrase(text)
    }
}

/// Executes the declarative state graph against one conversation context.
///
/// `on_enter` runs exactly once per state entry, in declared order. Within a
/// list the first transition whose condition holds wins: earlier replies
/// still emit, later siblings are skipped, and the target's `on_enter` runs
/// next.
pub struct StateMachine {
    flow: FlowDefinition,
    templates: TemplateRegistry,
    tools: ToolRegistry,
    handoff: Arc<HandoffService>,
    analyzer: Arc<Analyzer>,
}

impl StateMachine {
    pub fn new(
        flow: FlowDefinition,
        templates: TemplateRegistry,
        tools: ToolRegistry,
        handoff: Arc<HandoffService>,
        analyzer: Arc<Analyzer>,
    ) -> Result<Self, ConversationError> {
        for template in flow.referenced_templates() {
            if !templates.contains(template) {
                return Err(ConversationError::UnknownTemplate(template.to_string()));
            }
        }
        for tool in flow.referenced_tools() {
            if !tools.contains(tool) {
                return Err(ConversationError::UnknownTool(tool.to_string()));
            }
        }
        Ok(Self {
            flow,
            templates,
            tools,
            handoff,
            analyzer,
        })
    }

    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Enters `state` and follows the transition chain.
    #[instrument(skip(self, ctx))]
    pub async fn enter(
        &self,
        ctx: &mut ConversationContext,
        state: &str,
    ) -> Result<MachineOutcome, ConversationError> {
        let mut outcome = MachineOutcome::default();
        self.enter_chain(ctx, state.to_string(), &mut outcome, 0).await?;
        Ok(outcome)
    }

    /// Runs the current state's message trigger for the aggregated text
    /// already placed in `ctx.raw_message`.
    #[instrument(skip(self, ctx))]
    pub async fn on_message(
        &self,
        ctx: &mut ConversationContext,
    ) -> Result<MachineOutcome, ConversationError> {
        let mut outcome = MachineOutcome::default();
        let node = self.flow.state(&ctx.state)?;
        let actions = node.on_user_message.clone();
        if let Some(target) = self.run_actions(ctx, &actions, &mut outcome).await? {
            self.enter_chain(ctx, target, &mut outcome, 0).await?;
        }
        Ok(outcome)
    }

    async fn enter_chain(
        &self,
        ctx: &mut ConversationContext,
        mut state: String,
        outcome: &mut MachineOutcome,
        mut depth: usize,
    ) -> Result<(), ConversationError> {
        loop {
            if depth >= MAX_TRANSITION_DEPTH {
                return Err(ConversationError::FlowDefinition(format!(
                    "transition chain exceeded {} states",
                    MAX_TRANSITION_DEPTH
                )));
            }
            depth += 1;

            let node = self.flow.state(&state)?.clone();
            ctx.state = state.clone();
            outcome.entered.push(state.clone());
            debug!("Entered state {}", state);

            let mut next = self.run_actions(ctx, &node.on_enter, outcome).await?;

            // A state listening on slots evaluates its list immediately when
            // entered through a transition: the slots that brought the
            // conversation here are the trigger.
            if next.is_none() && node.reacts_to_slots {
                let actions = node.on_user_message.clone();
                next = self.run_actions(ctx, &actions, outcome).await?;
            }

            match next {
                Some(target) => state = target,
                None => return Ok(()),
            }
        }
    }

    /// Runs one action list. Returns the transition target when one fired.
    async fn run_actions(
        &self,
        ctx: &mut ConversationContext,
        actions: &[CompiledAction],
        outcome: &mut MachineOutcome,
    ) -> Result<Option<String>, ConversationError> {
        for action in actions {
            let scope = ctx.scope();
            if let Some(condition) = &action.condition {
                let predicates = AnalyzerPredicates {
                    analyzer: &self.analyzer,
                };
                if !condition.eval_bool(&scope, &predicates) {
                    continue;
                }
            }

            match &action.kind {
                ActionKind::Reply { template } => {
                    let text = self.templates.render(template, &scope)?;
                    outcome.replies.push(text);
                }
                ActionKind::Transition { target } => {
                    return Ok(Some(target.clone()));
                }
                ActionKind::CheckOverride { var } => {
                    let active = self.handoff.is_active(&ctx.tenant, &ctx.phone).await?;
                    ctx.set_var(var, Value::Bool(active));
                }
                ActionKind::AggregateBuffer => {
                    // The controller feeds the aggregated text in
                    // ctx.raw_message before this list runs; nothing to do.
                }
                ActionKind::SetVariable { name, value } => {
                    let resolved = resolve_value(value, &scope);
                    ctx.set_var(name, resolved);
                }
                ActionKind::CallTool {
                    tool,
                    args,
                    save_as,
                } => {
                    let resolved_args = resolve_value(args, &scope);
                    let result = self.tools.call(tool, &ctx.tenant, &resolved_args).await?;
                    bind_tool_result(ctx, save_as, result);
                }
            }
        }
        Ok(None)
    }
}

fn bind_tool_result(ctx: &mut ConversationContext, save_as: &str, result: Value) {
    // The two well-known bindings are mirrored into the slot map so they
    // survive persistence alongside the rest of the slots.
    match save_as {
        "top3" => {
            if let Some(items) = result.get("items") {
                ctx.slots.top3 = serde_json::from_value(items.clone()).unwrap_or_default();
            }
        }
        "validation" => {
            ctx.slots.validation = Some(result.clone());
        }
        _ => {}
    }
    ctx.set_var(save_as, result);
}

/// Resolves templated action arguments. A string that is exactly one
/// `{{path}}` placeholder becomes the referenced JSON value, keeping its
/// type; any other string is rendered as text; containers recurse.
fn resolve_value(value: &Value, scope: &Value) -> Value {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.starts_with("{{") && trimmed.ends_with("}}") && !trimmed[2..].contains("{{")
            {
                let path = trimmed[2..trimmed.len() - 2].trim();
                return lookup_path(scope, path).cloned().unwrap_or(Value::Null);
            }
            Value::String(render_template(raw, scope))
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| resolve_value(item, scope)).collect())
        }
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, scope));
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}
