//! Intention Analyzer
//!
//! Turns raw text into [`Intention`]s through a pluggable [`Classifier`].
//! Intentions live in a bounded arena keyed by id; relationships are id
//! sets on both ends and are only ever written under the arena's write
//! lock, so no reader observes a one-sided edge.
//!
//! Every intention is persisted before it is registered. A failed
//! classification registers nothing.

use crate::capability::{bounded, terms, Classification, ClassifyRequest, Classifier};
use crate::config::AnalysisConfig;
use crate::db::{now_millis, Database, IntentionRepository};
use sdk::errors::{EngineError, EntityKind, Result};
use sdk::intention::{
    Analysis, ConversationState, ExecutionRequirements, IntentRecord, Intention, IntentionKind,
    IntentionSource, IntentionStatus, PrimaryIntent, Relationships, SourceKind,
};
use sdk::session::{ChatTurn, ContextMap, ContextValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Session context key holding the bounded list of earlier intent records
pub const INTENTION_HISTORY_KEY: &str = "intention_history";

/// Primary intention of a chat turn plus derived ones
#[derive(Debug, Clone)]
pub struct ChatAnalysis {
    pub primary: Intention,
    pub additional: Vec<Intention>,
}

impl ChatAnalysis {
    pub fn single(primary: Intention) -> Self {
        Self {
            primary,
            additional: Vec::new(),
        }
    }

    /// Primary first, then additional intentions in derivation order
    pub fn all(&self) -> impl Iterator<Item = &Intention> {
        std::iter::once(&self.primary).chain(self.additional.iter())
    }
}

/// Intentions by id, evicted oldest first beyond `retention`
struct IntentionArena {
    intentions: HashMap<String, Intention>,
    order: VecDeque<String>,
    retention: usize,
}

impl IntentionArena {
    fn new(retention: usize) -> Self {
        Self {
            intentions: HashMap::new(),
            order: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    fn get(&self, id: &str) -> Option<&Intention> {
        self.intentions.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Intention> {
        self.intentions.get_mut(id)
    }

    fn insert(&mut self, intention: Intention) {
        let id = intention.id.clone();
        if self.intentions.insert(id.clone(), intention).is_none() {
            self.order.push_back(id);
        }

        while self.intentions.len() > self.retention {
            match self.order.pop_front() {
                Some(oldest) => self.evict(&oldest),
                None => break,
            }
        }
    }

    /// Remove an intention and the shared-table edges pointing at it
    ///
    /// Parent and child edges are persisted and stay resolvable.
    fn evict(&mut self, id: &str) {
        let Some(removed) = self.intentions.remove(id) else {
            return;
        };

        for related_id in &removed.relationships.related_intention_ids {
            if let Some(related) = self.intentions.get_mut(related_id) {
                related.relationships.related_intention_ids.remove(id);
            }
        }

        debug!(intention_id = id, "Intention evicted from arena");
    }

    fn link_related(&mut self, a: &str, b: &str) {
        if a == b || !self.intentions.contains_key(a) || !self.intentions.contains_key(b) {
            return;
        }
        if let Some(left) = self.intentions.get_mut(a) {
            left.relationships.related_intention_ids.insert(b.to_string());
        }
        if let Some(right) = self.intentions.get_mut(b) {
            right.relationships.related_intention_ids.insert(a.to_string());
        }
    }

    /// Earlier intentions of the same session mentioning one of its tables
    fn sharing_tables(&self, intention: &Intention) -> Vec<String> {
        let tables = intention.analysis.entity("tables");
        if tables.is_empty() {
            return Vec::new();
        }

        let mut found: Vec<String> = self
            .intentions
            .values()
            .filter(|other| other.id != intention.id)
            .filter(|other| {
                other.relationships.parent_intention_id.as_deref() != Some(intention.id.as_str())
            })
            .filter(|other| other.session_id() == intention.session_id())
            .filter(|other| {
                other
                    .analysis
                    .entity("tables")
                    .iter()
                    .any(|t| tables.contains(t))
            })
            .map(|other| other.id.clone())
            .collect();
        found.sort();
        found
    }

    fn len(&self) -> usize {
        self.intentions.len()
    }
}

pub struct IntentionAnalyzer {
    completion: Arc<dyn Classifier>,
    chat: Arc<dyn Classifier>,
    repo: IntentionRepository,
    arena: RwLock<IntentionArena>,
    timeout: Duration,
}

impl IntentionAnalyzer {
    pub fn new(
        db: &Database,
        completion: Arc<dyn Classifier>,
        chat: Arc<dyn Classifier>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            completion,
            chat,
            repo: db.intentions(),
            arena: RwLock::new(IntentionArena::new(config.intention_retention)),
            timeout: config.timeout(),
        }
    }

    pub fn completion_model(&self) -> &str {
        self.completion.model()
    }

    pub fn chat_model(&self) -> &str {
        self.chat.model()
    }

    /// Analyse a completion prompt into one parentless intention
    ///
    /// Earlier intentions are never consulted.
    pub async fn analyze_completion(
        &self,
        query: &str,
        session_id: Option<&str>,
        context: &ContextMap,
    ) -> Result<Intention> {
        let text = non_empty(query, "query")?;
        let classification = self
            .classify(&self.completion, text, context, Vec::new())
            .await?;

        let intention = build_intention(
            IntentionKind::Completion,
            SourceKind::Prompt,
            text,
            session_id,
            &classification,
            ConversationState::default(),
            now_millis(),
        );

        self.repo.insert(&intention).await?;
        self.arena.write().await.insert(intention.clone());

        info!(
            intention_id = %intention.id,
            primary_intent = %intention.analysis.primary_intent,
            executable = intention.is_executable(),
            "Completion analysed"
        );
        Ok(intention)
    }

    /// Analyse a chat message into a primary intention plus derived ones
    pub async fn analyze_chat(
        &self,
        message: &str,
        session_id: &str,
        context: &ContextMap,
        chat_history: &[ChatTurn],
    ) -> Result<ChatAnalysis> {
        let text = non_empty(message, "message")?;
        let history = self.intention_history(context, chat_history).await;
        let classification = self
            .classify(&self.chat, text, context, history.clone())
            .await?;

        let now = now_millis();
        let mut primary = build_intention(
            IntentionKind::Chat,
            SourceKind::Message,
            text,
            Some(session_id),
            &classification,
            ConversationState {
                previous_intents: history,
            },
            now,
        );

        let mut additional = Vec::new();
        if wants_explanation(&classification, text) {
            let mut child = explanation_for(&primary, now);
            child.relationships.parent_intention_id = Some(primary.id.clone());
            primary
                .relationships
                .child_intention_ids
                .insert(child.id.clone());
            additional.push(child);
        }

        self.repo.insert(&primary).await?;
        for child in &additional {
            self.repo.insert(child).await?;
        }

        {
            let mut arena = self.arena.write().await;
            arena.insert(primary.clone());
            for child in &additional {
                arena.insert(child.clone());
            }

            for other in arena.sharing_tables(&primary) {
                arena.link_related(&primary.id, &other);
            }

            if let Some(registered) = arena.get(&primary.id) {
                primary = registered.clone();
            }
        }

        info!(
            intention_id = %primary.id,
            session_id,
            primary_intent = %primary.analysis.primary_intent,
            executable = primary.is_executable(),
            derived = additional.len(),
            related = primary.relationships.related_intention_ids.len(),
            "Chat message analysed"
        );

        Ok(ChatAnalysis {
            primary,
            additional,
        })
    }

    /// Look up an intention, falling back to storage once evicted
    ///
    /// Intentions restored from storage carry their parent and child edges;
    /// shared-table edges exist only while both ends are in memory.
    pub async fn get_intention(&self, id: &str) -> Result<Intention> {
        if let Some(intention) = self.arena.read().await.get(id) {
            return Ok(intention.clone());
        }

        let mut intention = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Intention, id))?;
        intention
            .relationships
            .child_intention_ids
            .extend(self.repo.child_ids(id).await?);
        Ok(intention)
    }

    /// Children, then shared-table relations, then the parent of `id`
    pub async fn related_intentions(&self, id: &str) -> Result<Vec<Intention>> {
        let intention = self.get_intention(id).await?;
        let edges = &intention.relationships;

        let mut seen = HashSet::new();
        let mut related = Vec::new();
        for other in edges
            .child_intention_ids
            .iter()
            .chain(edges.related_intention_ids.iter())
            .chain(edges.parent_intention_id.iter())
        {
            if !seen.insert(other.as_str()) {
                continue;
            }
            match self.get_intention(other).await {
                Ok(found) => related.push(found),
                Err(e) if e.is_not_found(EntityKind::Intention) => {
                    debug!(intention_id = id, missing = %other, "Skipping dangling edge");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(related)
    }

    /// Advance an intention's status
    ///
    /// Setting the current status again is a no-op.
    pub async fn update_status(&self, id: &str, status: IntentionStatus) -> Result<Intention> {
        let mut arena = self.arena.write().await;

        let mut intention = match arena.get(id) {
            Some(found) => found.clone(),
            None => {
                let mut stored = self
                    .repo
                    .get(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(EntityKind::Intention, id))?;
                stored
                    .relationships
                    .child_intention_ids
                    .extend(self.repo.child_ids(id).await?);
                stored
            }
        };

        if intention.status == status {
            return Ok(intention);
        }
        if !intention.status.can_transition_to(status) {
            return Err(EngineError::InvalidRequest(format!(
                "Intention {} cannot move from {} to {}",
                id,
                intention.status.as_str(),
                status.as_str()
            )));
        }

        self.repo.update_status(id, status).await?;
        if let Some(registered) = arena.get_mut(id) {
            registered.status = status;
        }
        intention.status = status;

        debug!(intention_id = id, status = status.as_str(), "Intention status updated");
        Ok(intention)
    }

    /// Number of intentions currently held in memory
    pub async fn arena_len(&self) -> usize {
        self.arena.read().await.len()
    }

    async fn classify(
        &self,
        classifier: &Arc<dyn Classifier>,
        text: &str,
        context: &ContextMap,
        intention_history: Vec<IntentRecord>,
    ) -> Result<Classification> {
        let request = ClassifyRequest {
            text: text.to_string(),
            context: context.clone(),
            intention_history,
        };

        bounded(self.timeout, classifier.classify(&request))
            .await
            .map_err(|e| {
                warn!(model = classifier.model(), error = %e, "Classification failed");
                EngineError::AnalysisFailed(e.to_string())
            })
    }

    /// Earlier intent records, from session context or else from chat history
    async fn intention_history(
        &self,
        context: &ContextMap,
        chat_history: &[ChatTurn],
    ) -> Vec<IntentRecord> {
        if let Some(ContextValue::Json(raw)) = context.get(INTENTION_HISTORY_KEY) {
            match serde_json::from_value::<Vec<IntentRecord>>(raw.clone()) {
                Ok(records) => return records,
                Err(e) => warn!(error = %e, "Ignoring malformed intention history"),
            }
        }

        let arena = self.arena.read().await;
        chat_history
            .iter()
            .filter_map(|turn| arena.get(&turn.intention_id))
            .map(Intention::record)
            .collect()
    }
}

fn non_empty<'a>(text: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

fn build_intention(
    kind: IntentionKind,
    source_kind: SourceKind,
    text: &str,
    session_id: Option<&str>,
    classification: &Classification,
    conversation_state: ConversationState,
    now: i64,
) -> Intention {
    let database_name = classification
        .database_name
        .as_ref()
        .filter(|name| !name.trim().is_empty())
        .cloned();

    Intention {
        id: uuid::Uuid::new_v4().to_string(),
        kind,
        source: IntentionSource {
            kind: source_kind,
            content: text.to_string(),
            session_id: session_id.map(str::to_string),
        },
        analysis: Analysis {
            primary_intent: classification.primary_intent,
            sub_intents: classification.sub_intents.clone(),
            entities: classification.entities.clone(),
            constraints: classification.constraints.clone(),
            database_name,
            is_executable: classification.is_executable,
            execution_requirements: ExecutionRequirements {
                needs_clarification: !classification.missing_parameters.is_empty(),
                missing_parameters: classification.missing_parameters.clone(),
            },
            conversation_state,
        },
        status: IntentionStatus::Pending,
        relationships: Relationships::default(),
        version: 1,
        created_at: now,
    }
}

/// An explanation asked for next to some other request
fn wants_explanation(classification: &Classification, text: &str) -> bool {
    classification.primary_intent != PrimaryIntent::Explanation
        && (classification.sub_intents.iter().any(|s| s == "explanation")
            || terms(text).iter().any(|t| t.starts_with("explain")))
}

fn explanation_for(primary: &Intention, now: i64) -> Intention {
    Intention {
        id: uuid::Uuid::new_v4().to_string(),
        kind: primary.kind,
        source: IntentionSource {
            kind: SourceKind::Derived,
            content: primary.source.content.clone(),
            session_id: primary.source.session_id.clone(),
        },
        analysis: Analysis {
            primary_intent: PrimaryIntent::Explanation,
            sub_intents: Vec::new(),
            entities: primary.analysis.entities.clone(),
            constraints: Vec::new(),
            database_name: primary.analysis.database_name.clone(),
            is_executable: false,
            execution_requirements: ExecutionRequirements::default(),
            conversation_state: primary.analysis.conversation_state.clone(),
        },
        status: IntentionStatus::Pending,
        relationships: Relationships::default(),
        version: 1,
        created_at: now,
    }
}
