pub mod agents;
pub mod aggregate;
pub mod config;
pub mod engine;
pub mod render;
pub mod session;

pub use agents::{dispatch, AgentApi, AgentError, AgentReply, AgentRunRequest, AgentsClient};
pub use aggregate::{aggregate, AggregateError, AggregatedResponse};
pub use config::{AgentConfig, ConfigError, ConnectionConfig};
pub use engine::{QueryResult, SnowflakeEngine, Warehouse, WarehouseError};
pub use session::{ChatSession, Role, Transcript, Turn, TurnError, TurnOutcome};
