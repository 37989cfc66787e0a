//! Request-level continuation: which modules still have work, which are done,
//! and the `continue` object the caller merges into its next request.
//!
//! The `continue` value has the form `<generator-part>||<done-modules>`.
//! The generator part is the generator's continue parameter while it has more
//! pages, or `-` once it is exhausted (or when there is no generator). Done
//! modules are skipped when the value comes back.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::executor::{ContinuationOutcome, ListOutcome};
use crate::params::RequestParams;

const GENERATOR_DONE: &str = "-";

#[derive(Debug, Clone, Default)]
pub struct ContinueManager {
    resumed: bool,
    generator_done: bool,
    skipped: BTreeSet<String>,
    entries: BTreeMap<String, String>,
    done: BTreeSet<String>,
    page_consumers: BTreeSet<String>,
    list_continues: bool,
    generator_param: Option<String>,
    restart: Option<(String, String)>,
}

/// The continuation parts of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinueOutput {
    pub continue_values: Option<Map<String, Value>>,
    pub restart: Option<Value>,
    pub batch_complete: bool,
}

impl ContinueManager {
    /// Reads the incoming `continue` value. Absent or empty means a fresh
    /// request.
    pub fn from_request(request: &RequestParams) -> QueryResult<Self> {
        let mut manager = Self::default();
        let Some(raw) = request.get("continue").map(str::trim) else {
            return Ok(manager);
        };
        if raw.is_empty() {
            return Ok(manager);
        }
        let Some((generator_part, done)) = raw.split_once("||") else {
            return Err(QueryError::invalid_parameter(
                "continue",
                raw,
                "expected the value from the previous response's continue object",
            ));
        };
        if generator_part.is_empty() {
            return Err(QueryError::invalid_parameter(
                "continue",
                raw,
                "missing generator part",
            ));
        }
        manager.resumed = true;
        manager.generator_done = generator_part == GENERATOR_DONE;
        manager.skipped = done
            .split('|')
            .map(str::trim)
            .filter(|module| !module.is_empty())
            .map(str::to_string)
            .collect();
        Ok(manager)
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Whether a module finished in an earlier batch.
    pub fn is_skipped(&self, module: &str) -> bool {
        self.skipped.contains(module)
    }

    /// Whether the generator finished in an earlier batch.
    pub fn is_generator_skipped(&self) -> bool {
        self.resumed && self.generator_done
    }

    /// Marks a module finished without running it.
    pub fn record_done(&mut self, module: &str) {
        self.done.insert(module.to_string());
    }

    /// Modules fed by the page set are only done once the generator is.
    pub fn record_page_consumer(&mut self, module: &str) {
        self.page_consumers.insert(module.to_string());
    }

    pub fn record_list(&mut self, outcome: &ListOutcome) {
        match &outcome.continuation {
            ContinuationOutcome::Complete | ContinuationOutcome::RestartHint { .. } => {
                self.done.insert(outcome.module.to_string());
            }
            ContinuationOutcome::Resume(token) => {
                self.list_continues = true;
                self.entries
                    .insert(outcome.continue_param.clone(), token.clone());
            }
            ContinuationOutcome::Deferred => {
                self.list_continues = true;
                if let Some(incoming) = &outcome.incoming {
                    self.entries
                        .insert(outcome.continue_param.clone(), incoming.clone());
                }
            }
        }
    }

    pub fn record_generator(&mut self, outcome: &ListOutcome) {
        match &outcome.continuation {
            ContinuationOutcome::Complete => {}
            ContinuationOutcome::Resume(token) => {
                self.generator_param = Some(outcome.continue_param.clone());
                self.entries
                    .insert(outcome.continue_param.clone(), token.clone());
            }
            ContinuationOutcome::Deferred => {
                self.generator_param = Some(outcome.continue_param.clone());
                if let Some(incoming) = &outcome.incoming {
                    self.entries
                        .insert(outcome.continue_param.clone(), incoming.clone());
                }
            }
            ContinuationOutcome::RestartHint { reason } => {
                self.restart = Some((outcome.module.to_string(), reason.clone()));
            }
        }
    }

    /// True when no list module has more rows.
    pub fn is_batch_complete(&self) -> bool {
        !self.list_continues
    }

    pub fn finish(self) -> ContinueOutput {
        let batch_complete = self.is_batch_complete();
        let generator_continues = self.generator_param.is_some();
        let restart = self
            .restart
            .map(|(module, reason)| json!({"module": module, "reason": reason}));

        if !self.list_continues && !generator_continues {
            return ContinueOutput {
                continue_values: None,
                restart,
                batch_complete,
            };
        }

        let mut done = self.done;
        if !generator_continues {
            done.extend(self.page_consumers);
        }
        let generator_part = self
            .generator_param
            .unwrap_or_else(|| GENERATOR_DONE.to_string());
        let done: Vec<String> = done.into_iter().collect();
        let value = format!("{generator_part}||{}", done.join("|"));
        debug!(continue_value = %value, entries = self.entries.len(), "continuing query");

        let mut continue_values: Map<String, Value> = self
            .entries
            .into_iter()
            .map(|(param, token)| (param, Value::String(token)))
            .collect();
        continue_values.insert("continue".to_string(), Value::String(value));
        ContinueOutput {
            continue_values: Some(continue_values),
            restart,
            batch_complete,
        }
    }
}

/// Copies every entry of a response `continue` object into `params`.
/// Returns false when there is nothing to merge.
pub fn merge_continue(params: &mut RequestParams, continue_values: &Value) -> bool {
    let Some(entries) = continue_values.as_object() else {
        return false;
    };
    for (name, value) in entries {
        match value {
            Value::String(text) => params.set(name, text),
            other => params.set(name, &other.to_string()),
        }
    }
    !entries.is_empty()
}

/// The request for the next batch: the original request plus the response's
/// `continue` object. `None` once the response carries no `continue`.
pub fn next_request(original: &RequestParams, response: &Value) -> Option<RequestParams> {
    let continue_values = response.get("continue")?;
    let mut params = original.clone();
    merge_continue(&mut params, continue_values).then_some(params)
}
