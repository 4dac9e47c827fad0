use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Flow definition error: {0}")]
    FlowDefinition(String),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Tool call failed: {0}")]
    ToolCall(String),

    #[error("Storage error: {0}")]
    Storage(#[from] shared_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
