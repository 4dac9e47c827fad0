pub mod buffer;
pub mod classify;
pub mod controller;
pub mod expr;
pub mod flow;
pub mod handoff;
pub mod hooks;
pub mod machine;
pub mod nlp;
pub mod tools;

pub use buffer::{BufferOutcome, FlushEvent, MessageBuffer};
pub use classify::{Classification, DisambiguationService, QueryKind};
pub use controller::ConversationController;
pub use expr::Expr;
pub use flow::FlowDefinition;
pub use handoff::HandoffService;
pub use hooks::UpsellIntegration;
pub use machine::{MachineOutcome, StateMachine};
pub use nlp::{Analyzer, AnalyzerConfig, Intent, NlpResult};
pub use tools::{
    CreateAppointmentTool, SearchTopServicesTool, Tool, ToolRegistry, ValidateAvailabilityTool,
};
