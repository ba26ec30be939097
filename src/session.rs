use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::agents::{dispatch, AgentApi, AgentError};
use crate::aggregate::{aggregate, AggregateError, AggregatedResponse};
use crate::config::AgentConfig;
use crate::engine::{run_query, QueryResult, Warehouse, WarehouseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Append-only record of the session's turns, oldest first.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
            at: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Anything that stopped part of a turn. Reported, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub response: AggregatedResponse,
    pub table: Option<QueryResult>,
    pub diagnostics: Vec<TurnError>,
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        &self.response.text
    }

    pub fn sql(&self) -> &str {
        &self.response.sql
    }
}

pub struct ChatSession<A, W> {
    id: Uuid,
    config: AgentConfig,
    agent: A,
    warehouse: W,
    transcript: Transcript,
}

impl<A, W> ChatSession<A, W>
where
    A: AgentApi,
    W: Warehouse,
{
    pub fn new(config: AgentConfig, agent: A, warehouse: W) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            agent,
            warehouse,
            transcript: Transcript::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run one user turn: record the question, ask every semantic model,
    /// record the assistant's text and execute any generated SQL.
    pub async fn run_turn(&mut self, query: &str) -> TurnOutcome {
        let span = tracing::info_span!("turn", session = %self.id, turn = self.transcript.len());
        self.run_turn_inner(query).instrument(span).await
    }

    async fn run_turn_inner(&mut self, query: &str) -> TurnOutcome {
        self.transcript.push(Role::User, query);
        let mut outcome = TurnOutcome::default();

        let responses = match dispatch(&self.agent, &self.config, query).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(error = %e, "agent dispatch failed");
                outcome.diagnostics.push(e.into());
                Vec::new()
            }
        };

        outcome.response = match aggregate(&responses) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "aggregation failed");
                outcome.diagnostics.push(e.into());
                AggregatedResponse::default()
            }
        };

        if outcome.response.has_text() {
            self.transcript
                .push(Role::Assistant, outcome.response.text.clone());
        }

        if outcome.response.has_sql() {
            match run_query(&self.warehouse, &outcome.response.sql).await {
                Ok(result) if !result.is_empty() => {
                    info!(rows = result.row_count(), "query returned rows");
                    outcome.table = Some(result);
                }
                Ok(_) => info!("query returned no rows"),
                Err(e) => {
                    warn!(error = %e, "warehouse query failed");
                    outcome.diagnostics.push(e.into());
                }
            }
        }

        outcome
    }
}
