//! Assistant Orchestrator
//!
//! Binds a request to a session and drives analysis, enrichment and
//! planning strictly in sequence, then writes the turn back to the
//! session. Turns on the same session are serialized by [`SessionLocks`].
//!
//! Each stage commits its own effects. A later failure does not roll back
//! earlier stages; the error is wrapped with the failing stage and ids.

use super::cancel::CancellationToken;
use super::context::ContextEngine;
use super::intention::{ChatAnalysis, IntentionAnalyzer, INTENTION_HISTORY_KEY};
use super::planner::Planner;
use super::response::compose_text;
use crate::capability::{
    CatalogGraph, CatalogRetriever, ClientFactory, Classifier, KnowledgeGraph, Retriever,
};
use crate::config::{Config, SessionConfig};
use crate::db::{now_millis, Database};
use crate::message_bus::{Event, EventType, MessageBus};
use crate::session::{NewTurn, SessionGuard, SessionLocks, SessionStore};
use sdk::errors::{EngineError, Result, Stage};
use sdk::intention::{IntentRecord, Intention, IntentionStatus};
use sdk::plan::Plan;
use sdk::response::{
    IntentionDigest, IntentionSummary, PlanSummary, Response, ResponseData, ResponseMetadata,
};
use sdk::session::{context_to_json, ChatTurn, ContextMap, ContextValue, Session};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Session context keys written after every turn
pub const LAST_INTENTION_KEY: &str = "last_intention_id";
pub const LAST_PLANS_KEY: &str = "last_plan_ids";
pub const LAST_REQUEST_KEY: &str = "last_request_id";

/// Collaborators the pipeline runs against
pub struct Capabilities {
    pub completion: Arc<dyn Classifier>,
    pub chat: Arc<dyn Classifier>,
    pub retriever: Arc<dyn Retriever>,
    pub graph: Arc<dyn KnowledgeGraph>,
}

impl Capabilities {
    /// Configured classifiers plus catalog-backed retrieval
    pub fn from_config(db: &Database, config: &Config, factory: &ClientFactory) -> Result<Self> {
        let classifier = |model: &str| {
            factory.classifier(model).map_err(|e| {
                EngineError::Config(format!("Cannot use classifier model '{}': {}", model, e))
            })
        };

        Ok(Self {
            completion: classifier(&config.analysis.completion_model)?,
            chat: classifier(&config.analysis.chat_model)?,
            retriever: Arc::new(CatalogRetriever::new(db)),
            graph: Arc::new(CatalogGraph::new(db)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Completion,
    Chat,
}

pub struct Assistant {
    sessions: Arc<SessionStore>,
    locks: SessionLocks,
    analyzer: IntentionAnalyzer,
    enrichment: ContextEngine,
    planner: Planner,
    bus: MessageBus,
    session_config: SessionConfig,
}

impl Assistant {
    pub fn new(db: &Database, config: &Config, capabilities: Capabilities) -> Self {
        let sessions = Arc::new(SessionStore::new(db));

        Self {
            analyzer: IntentionAnalyzer::new(
                db,
                capabilities.completion,
                capabilities.chat,
                &config.analysis,
            ),
            enrichment: ContextEngine::new(
                capabilities.retriever,
                capabilities.graph,
                Arc::clone(&sessions),
                config.enrichment.clone(),
            ),
            planner: Planner::new(db, config.analysis.intention_retention),
            sessions,
            locks: SessionLocks::new(),
            bus: MessageBus::new(),
            session_config: config.session.clone(),
        }
    }

    /// Answer a one-shot completion prompt
    pub async fn complete(
        &self,
        query: &str,
        context: Option<ContextMap>,
        session_id: Option<&str>,
    ) -> Result<Response> {
        self.complete_cancellable(query, context, session_id, &CancellationToken::new())
            .await
    }

    pub async fn complete_cancellable(
        &self,
        query: &str,
        context: Option<ContextMap>,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.run_turn(TurnKind::Completion, query, session_id, context, cancel)
            .await
    }

    /// Handle one chat message
    pub async fn chat(
        &self,
        message: &str,
        session_id: Option<&str>,
        context: Option<ContextMap>,
    ) -> Result<Response> {
        self.chat_cancellable(message, session_id, context, &CancellationToken::new())
            .await
    }

    /// Handle one chat message, stopping between stages once `cancel` fires
    pub async fn chat_cancellable(
        &self,
        message: &str,
        session_id: Option<&str>,
        context: Option<ContextMap>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.run_turn(TurnKind::Chat, message, session_id, context, cancel)
            .await
    }

    /// End a session; returns whether a live session was ended
    pub async fn end_session(&self, session_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(session_id).await;
        let ended = self
            .sessions
            .end(session_id)
            .await
            .map_err(|e| e.in_stage(Stage::Session, Some(session_id.to_string()), None))?;

        if ended {
            self.bus
                .publish(Event::SessionEnded {
                    session_id: session_id.to_string(),
                })
                .await;
        }
        Ok(ended)
    }

    pub async fn get_history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        self.sessions
            .history(session_id)
            .await
            .map_err(|e| e.in_stage(Stage::Session, Some(session_id.to_string()), None))
    }

    /// End every session idle past the configured timeout
    pub async fn sweep_expired(&self) -> Result<usize> {
        let swept = self
            .sessions
            .sweep_expired(now_millis(), self.session_config.timeout())
            .await?;

        let count = swept.len();
        if count > 0 {
            self.bus
                .publish(Event::SessionsExpired {
                    session_ids: swept,
                })
                .await;
        }
        Ok(count)
    }

    pub async fn active_sessions(&self) -> Result<Vec<String>> {
        self.sessions.active_sessions().await
    }

    /// Stream of turn and session events
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        self.bus.subscribe(event_type).await
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn analyzer(&self) -> &IntentionAnalyzer {
        &self.analyzer
    }

    pub fn enrichment(&self) -> &ContextEngine {
        &self.enrichment
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    async fn run_turn(
        &self,
        kind: TurnKind,
        text: &str,
        session_id: Option<&str>,
        context: Option<ContextMap>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let outcome = self
            .execute(kind, &request_id, text, session_id, context.unwrap_or_default(), cancel)
            .await;

        match &outcome {
            Ok(response) => {
                info!(
                    request_id = %request_id,
                    session_id = %response.metadata.session_id,
                    intention_id = %response.metadata.intention_id,
                    plans = response.metadata.plan_ids.len(),
                    context_version = response.metadata.context_version,
                    "Turn completed"
                );
                self.bus
                    .publish(Event::TurnCompleted {
                        response: Box::new(response.clone()),
                    })
                    .await;
            }
            Err(e) => {
                let failed_session = match e {
                    EngineError::Stage { session_id, .. } => session_id.clone(),
                    _ => session_id.map(str::to_string),
                };
                error!(
                    request_id = %request_id,
                    session_id = failed_session.as_deref().unwrap_or("-"),
                    error = %e,
                    "Turn failed"
                );
                self.bus
                    .publish(Event::TurnFailed {
                        session_id: failed_session,
                        request_id: request_id.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        outcome
    }

    async fn execute(
        &self,
        kind: TurnKind,
        request_id: &str,
        text: &str,
        session_id: Option<&str>,
        caller_context: ContextMap,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let started_at = now_millis();

        if text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("input must not be empty".to_string())
                .in_stage(Stage::Analysis, session_id.map(str::to_string), None));
        }

        let (session, is_new_session, _guard) = self
            .resolve_session(session_id, &caller_context)
            .await
            .map_err(|e| e.in_stage(Stage::Session, session_id.map(str::to_string), None))?;
        let sid = session.session_id.as_str();

        // Analysis
        checkpoint(cancel, Stage::Analysis, sid, None)?;
        let analysis = match kind {
            TurnKind::Completion => self
                .analyzer
                .analyze_completion(text, Some(sid), &session.context)
                .await
                .map(ChatAnalysis::single),
            TurnKind::Chat => {
                self.analyzer
                    .analyze_chat(text, sid, &session.context, &session.chat_history)
                    .await
            }
        }
        .map_err(|e| wrap(e, Stage::Analysis, sid, None))?;
        let primary_id = analysis.primary.id.as_str();

        // Enrichment
        checkpoint(cancel, Stage::Enrichment, sid, Some(primary_id))?;
        self.analyzer
            .update_status(primary_id, IntentionStatus::Active)
            .await
            .map_err(|e| wrap(e, Stage::Enrichment, sid, Some(primary_id)))?;

        let refined = match self.enrichment.refine_context(sid, &analysis.primary).await {
            Ok(refined) => refined,
            Err(e) => {
                self.fail_intention(primary_id).await;
                return Err(wrap(e, Stage::Enrichment, sid, Some(primary_id)));
            }
        };

        // Planning
        checkpoint(cancel, Stage::Planning, sid, Some(primary_id))?;
        let mut plans: BTreeMap<String, Plan> = BTreeMap::new();
        let mut plan_ids = Vec::new();
        for intention in analysis.all().filter(|i| i.is_executable()) {
            match self.planner.create_plan(intention).await {
                Ok(plan) => {
                    plan_ids.push(plan.plan_id.clone());
                    plans.insert(intention.id.clone(), plan);
                }
                Err(e) => {
                    self.fail_intention(primary_id).await;
                    return Err(wrap(e, Stage::Planning, sid, Some(&intention.id)));
                }
            }
        }

        let primary = self
            .analyzer
            .update_status(primary_id, IntentionStatus::Completed)
            .await
            .map_err(|e| wrap(e, Stage::Planning, sid, Some(primary_id)))?;

        let mut additional = Vec::with_capacity(analysis.additional.len());
        for extra in &analysis.additional {
            additional.push(if extra.is_executable() {
                self.complete_intention(extra)
                    .await
                    .map_err(|e| wrap(e, Stage::Planning, sid, Some(&extra.id)))?
            } else {
                extra.clone()
            });
        }

        // Persistence
        checkpoint(cancel, Stage::Persistence, sid, Some(primary_id))?;
        let reply = compose_text(&analysis, &plans);
        let patch = session_patch(
            &refined.data,
            &primary,
            &plan_ids,
            request_id,
            self.session_config.intention_history_limit,
        );

        self.sessions
            .update_context(sid, &patch)
            .await
            .map_err(|e| wrap(e, Stage::Persistence, sid, Some(primary_id)))?;

        self.sessions
            .append_history(
                sid,
                &NewTurn {
                    user_input: text.to_string(),
                    assistant_output: reply.clone(),
                    user_at: started_at,
                    assistant_at: now_millis(),
                    intention_id: primary.id.clone(),
                    plan_ids: plan_ids.clone(),
                    request_id: request_id.to_string(),
                    context_version: refined.version,
                },
            )
            .await
            .map_err(|e| wrap(e, Stage::Persistence, sid, Some(primary_id)))?;

        let model = match kind {
            TurnKind::Completion => self.analyzer.completion_model(),
            TurnKind::Chat => self.analyzer.chat_model(),
        };

        Ok(Response {
            text: reply,
            data: ResponseData {
                model: model.to_string(),
                intention: IntentionSummary {
                    primary: IntentionDigest::from(&primary),
                    additional: additional.iter().map(IntentionDigest::from).collect(),
                },
                context: context_to_json(&refined.data),
                plans: plans
                    .iter()
                    .map(|(id, plan)| (id.clone(), PlanSummary::from(plan)))
                    .collect(),
            },
            context: context_to_json(&caller_context),
            metadata: ResponseMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                request_id: request_id.to_string(),
                session_id: sid.to_string(),
                is_new_session,
                intention_id: primary.id.clone(),
                plan_ids,
                context_version: refined.version,
                total_intentions: 1 + additional.len(),
            },
        })
    }

    /// Lock and load the caller's session, or create one seeded with the context
    async fn resolve_session(
        &self,
        session_id: Option<&str>,
        caller_context: &ContextMap,
    ) -> Result<(Session, bool, SessionGuard)> {
        match session_id {
            Some(id) => {
                let guard = self.locks.acquire(id).await;
                if !caller_context.is_empty() {
                    self.sessions.update_context(id, caller_context).await?;
                }
                let session = self.sessions.get(id).await?;
                Ok((session, false, guard))
            }
            None => {
                let session = self.sessions.create(Some(caller_context.clone())).await?;
                let guard = self.locks.acquire(&session.session_id).await;
                self.bus
                    .publish(Event::SessionCreated {
                        session_id: session.session_id.clone(),
                    })
                    .await;
                Ok((session, true, guard))
            }
        }
    }

    async fn complete_intention(&self, intention: &Intention) -> Result<Intention> {
        self.analyzer
            .update_status(&intention.id, IntentionStatus::Active)
            .await?;
        self.analyzer
            .update_status(&intention.id, IntentionStatus::Completed)
            .await
    }

    async fn fail_intention(&self, intention_id: &str) {
        if let Err(e) = self
            .analyzer
            .update_status(intention_id, IntentionStatus::Failed)
            .await
        {
            warn!(intention_id, error = %e, "Could not mark intention failed");
        }
    }
}

fn wrap(
    error: EngineError,
    stage: Stage,
    session_id: &str,
    intention_id: Option<&str>,
) -> EngineError {
    error.in_stage(
        stage,
        Some(session_id.to_string()),
        intention_id.map(str::to_string),
    )
}

fn checkpoint(
    cancel: &CancellationToken,
    next: Stage,
    session_id: &str,
    intention_id: Option<&str>,
) -> Result<()> {
    if cancel.is_cancelled() {
        info!(session_id, stage = %next, "Turn cancelled");
        return Err(wrap(
            EngineError::Cancelled { stage: next },
            next,
            session_id,
            intention_id,
        ));
    }
    Ok(())
}

/// Context written back after a turn
///
/// Appends the primary intention to `intention_history`, keeping the newest
/// `history_limit` records.
pub fn session_patch(
    context: &ContextMap,
    primary: &Intention,
    plan_ids: &[String],
    request_id: &str,
    history_limit: usize,
) -> ContextMap {
    let mut history: Vec<IntentRecord> = match context.get(INTENTION_HISTORY_KEY) {
        Some(ContextValue::Json(raw)) => {
            serde_json::from_value(raw.clone()).unwrap_or_default()
        }
        _ => Vec::new(),
    };
    history.push(primary.record());
    if history.len() > history_limit {
        let excess = history.len() - history_limit;
        history.drain(..excess);
    }

    let mut patch = ContextMap::new();
    patch.insert(
        LAST_INTENTION_KEY.to_string(),
        ContextValue::from(primary.id.as_str()),
    );
    patch.insert(LAST_PLANS_KEY.to_string(), ContextValue::Json(json!(plan_ids)));
    patch.insert(LAST_REQUEST_KEY.to_string(), ContextValue::from(request_id));
    patch.insert(
        INTENTION_HISTORY_KEY.to_string(),
        ContextValue::Json(json!(history)),
    );
    patch
}
