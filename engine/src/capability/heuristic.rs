//! Rule-based classifier
//!
//! A deterministic stand-in for a model-backed classifier. Intent is picked
//! by the first matching rule, in order: system command, clarification,
//! refinement (only with prior intents), pure explanation, schema inquiry,
//! data exploration, and finally SQL query.

use super::{Classification, ClassifyRequest, Classifier, Result};
use async_trait::async_trait;
use regex::Regex;
use sdk::intention::PrimaryIntent;
use std::collections::BTreeMap;

pub const HEURISTIC_MODEL: &str = "heuristic";

pub struct HeuristicClassifier {
    model: String,
    clarification: Regex,
    refinement: Regex,
    explanation_lead: Regex,
    explain_anywhere: Regex,
    action: Regex,
    schema: Regex,
    exploration: Regex,
    tables: Regex,
    fields: Regex,
    database: Regex,
    limit: Regex,
    filter: Regex,
    period: Regex,
}

impl HeuristicClassifier {
    /// Create a classifier reporting the given model name
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new(model: impl Into<String>) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            model: model.into(),
            clarification: Regex::new(
                r"\b(what do you mean|clarify|did you mean|which one|which (table|database|column))\b",
            )?,
            refinement: Regex::new(
                r"\b(instead|also|only|refine|change|modify|filter|exclude|sort|narrow|same but|as well)\b",
            )?,
            explanation_lead: Regex::new(r"^(explain|why|what does|how does)\b")?,
            explain_anywhere: Regex::new(r"\bexplain")?,
            action: Regex::new(r"\b(show|list|find|get|count|select|give|top|sum|average|total)\b")?,
            schema: Regex::new(
                r"\b(schema|columns|fields|describe|structure|what tables|which tables)\b",
            )?,
            exploration: Regex::new(
                r"\b(explore|exploration|overview|distribution|summari[sz]e|summary|profile|trends?)\b",
            )?,
            tables: Regex::new(
                r"\b(?:from|join|table|into|update)\s+([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)",
            )?,
            fields: Regex::new(r"\b(?:by|per|column|field)\s+([a-z_][a-z0-9_]*)")?,
            database: Regex::new(r"\b(?:in|on|from|use)\s+(?:the\s+)?([a-z_][a-z0-9_]*)\s+(?:database|db)\b")?,
            limit: Regex::new(r"\b(?:top|first|last|limit)\s+(\d+)")?,
            filter: Regex::new(r"\b(?:where|having|with)\s+([^,.;]+)")?,
            period: Regex::new(
                r"\b(today|yesterday|this (?:week|month|quarter|year)|last (?:week|month|quarter|year)|since [0-9a-z-]+)\b",
            )?,
        })
    }

    fn primary_intent(&self, text: &str, has_history: bool) -> PrimaryIntent {
        if text.starts_with('/') {
            PrimaryIntent::SystemCommand
        } else if self.clarification.is_match(text) {
            PrimaryIntent::Clarification
        } else if has_history && self.refinement.is_match(text) {
            PrimaryIntent::Refinement
        } else if self.explanation_lead.is_match(text) && !self.action.is_match(text) {
            PrimaryIntent::Explanation
        } else if self.schema.is_match(text) {
            PrimaryIntent::SchemaInquiry
        } else if self.exploration.is_match(text) {
            PrimaryIntent::DataExploration
        } else {
            PrimaryIntent::SqlQuery
        }
    }

    fn entities(&self, text: &str, request: &ClassifyRequest) -> BTreeMap<String, Vec<String>> {
        let mut tables = captures(&self.tables, text);
        if let Some(table) = request.context.get("table_name").and_then(|v| v.as_str()) {
            push_unique(&mut tables, table.to_lowercase());
        }

        let fields = captures(&self.fields, text);

        let mut entities = BTreeMap::new();
        if !tables.is_empty() {
            entities.insert("tables".to_string(), tables);
        }
        if !fields.is_empty() {
            entities.insert("fields".to_string(), fields);
        }
        entities
    }

    fn constraints(&self, text: &str) -> Vec<String> {
        let mut constraints = Vec::new();

        for cap in self.limit.captures_iter(text) {
            push_unique(&mut constraints, format!("limit {}", &cap[1]));
        }
        for cap in self.filter.captures_iter(text) {
            push_unique(&mut constraints, cap[1].trim().to_string());
        }
        for cap in self.period.captures_iter(text) {
            push_unique(&mut constraints, cap[1].to_string());
        }

        constraints
    }

    fn database_name(&self, text: &str, request: &ClassifyRequest) -> Option<String> {
        self.database
            .captures(text)
            .map(|cap| cap[1].to_string())
            .or_else(|| {
                ["database_name", "database"]
                    .iter()
                    .find_map(|key| request.context.get(*key).and_then(|v| v.as_str()))
                    .filter(|name| !name.trim().is_empty())
                    .map(str::to_string)
            })
    }
}

fn captures(pattern: &Regex, text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for cap in pattern.captures_iter(text) {
        push_unique(&mut found, cap[1].to_string());
    }
    found
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Intents whose retrieval is scoped to one database
pub fn needs_database(intent: PrimaryIntent) -> bool {
    matches!(
        intent,
        PrimaryIntent::SqlQuery | PrimaryIntent::DataExploration | PrimaryIntent::SchemaInquiry
    )
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    fn model(&self) -> &str {
        &self.model
    }

    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification> {
        let text = request.text.trim().to_lowercase();
        let primary_intent = self.primary_intent(&text, !request.intention_history.is_empty());

        let mut sub_intents = Vec::new();
        if primary_intent != PrimaryIntent::Explanation && self.explain_anywhere.is_match(&text) {
            sub_intents.push("explanation".to_string());
        }

        let database_name = self.database_name(&text, request);

        let mut missing_parameters = Vec::new();
        if needs_database(primary_intent) && database_name.is_none() {
            missing_parameters.push("database_name".to_string());
        }

        let is_executable = missing_parameters.is_empty()
            && matches!(
                primary_intent,
                PrimaryIntent::SqlQuery
                    | PrimaryIntent::DataExploration
                    | PrimaryIntent::SchemaInquiry
                    | PrimaryIntent::Clarification
                    | PrimaryIntent::Refinement
            );

        Ok(Classification {
            primary_intent,
            sub_intents,
            entities: self.entities(&text, request),
            constraints: self.constraints(&text),
            database_name,
            is_executable,
            missing_parameters,
        })
    }
}
