pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod templates;

pub use error::ConversationError;
pub use models::{ConversationContext, ConversationResponse, Slots};
pub use services::{
    Analyzer, AnalyzerConfig, BufferOutcome, Classification, ConversationController,
    CreateAppointmentTool, DisambiguationService, FlowDefinition, FlushEvent, HandoffService,
    Intent, MessageBuffer, QueryKind, SearchTopServicesTool, StateMachine, ToolRegistry,
    UpsellIntegration, ValidateAvailabilityTool,
};
pub use templates::TemplateRegistry;
