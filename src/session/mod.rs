//! Session/conversation manager
//!
//! Holds ordered turn history per session. Sessions are created implicitly
//! on first use and live for the host process; when a Postgres URL is
//! configured the turns are persisted there instead, with a silent fallback
//! to in-memory if the pool cannot be created.

use crate::error::AssistantError;
use crate::models::{ConversationTurn, TurnRole};
use crate::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

enum SessionBackend {
    InMemory {
        sessions: Arc<RwLock<HashMap<String, Vec<ConversationTurn>>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

pub struct SessionManager {
    backend: SessionBackend,
}

impl SessionManager {
    pub fn in_memory() -> Self {
        Self {
            backend: SessionBackend::InMemory {
                sessions: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Pick the backend from the environment: Postgres when a database URL
    /// is present and connectable, in-memory otherwise.
    pub fn from_env() -> Self {
        let database_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(&url)
            {
                Ok(pool) => {
                    info!("Session store backend: postgres");
                    return Self {
                        backend: SessionBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres session store, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Session store backend: in-memory");
        Self::in_memory()
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let SessionBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_turns (
                      turn_id UUID PRIMARY KEY,
                      session_id TEXT NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      agent_source TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_conversation_turns_session_time
                    ON conversation_turns (session_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AssistantError::Database(format!(
                    "Failed to initialize session store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn role_to_db(role: TurnRole) -> &'static str {
        match role {
            TurnRole::User => "user",
            TurnRole::Agent => "agent",
        }
    }

    fn role_from_db(role: &str) -> TurnRole {
        match role.to_lowercase().as_str() {
            "agent" => TurnRole::Agent,
            _ => TurnRole::User,
        }
    }

    /// Append a turn to a session, creating the session implicitly.
    pub async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<()> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                let mut locked = sessions.write().await;
                locked.entry(session_id.to_string()).or_default().push(turn);
                Ok(())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                sqlx::query(
                    r#"
                    INSERT INTO conversation_turns
                      (turn_id, session_id, role, content, agent_source, created_at)
                    VALUES
                      ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(turn.turn_id)
                .bind(session_id)
                .bind(Self::role_to_db(turn.role))
                .bind(&turn.text)
                .bind(&turn.agent_source)
                .bind(turn.timestamp)
                .execute(pool)
                .await
                .map_err(|e| {
                    AssistantError::Database(format!("Failed to insert conversation turn: {}", e))
                })?;

                Ok(())
            }
        }
    }

    /// The most recent `max_turns` turns, in chronological order. Unknown
    /// sessions yield an empty history.
    pub async fn history(&self, session_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                let locked = sessions.read().await;
                let turns = locked.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
                let start = turns.len().saturating_sub(max_turns);
                Ok(turns[start..].to_vec())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    r#"
                    SELECT turn_id, role, content, agent_source, created_at
                    FROM conversation_turns
                    WHERE session_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(session_id)
                .bind(max_turns as i64)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    AssistantError::Database(format!("Failed to load session history: {}", e))
                })?;

                let mut turns: Vec<ConversationTurn> = rows
                    .into_iter()
                    .map(|row| {
                        let db_role: String =
                            row.try_get("role").unwrap_or_else(|_| "user".to_string());
                        ConversationTurn {
                            turn_id: row.try_get("turn_id").unwrap_or_else(|_| Uuid::new_v4()),
                            role: Self::role_from_db(&db_role),
                            text: row.try_get("content").unwrap_or_default(),
                            timestamp: row
                                .try_get("created_at")
                                .unwrap_or_else(|_| chrono::Utc::now()),
                            agent_source: row.try_get("agent_source").ok(),
                        }
                    })
                    .collect();

                turns.reverse();
                Ok(turns)
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::in_memory()
    }
}
