//! Per-request result accumulator with a byte budget.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct ApiResult {
    lists: BTreeMap<String, Vec<Value>>,
    warnings: BTreeMap<String, Vec<String>>,
    size: usize,
    max_size: usize,
}

impl ApiResult {
    pub fn new(max_size: usize) -> Self {
        Self {
            lists: BTreeMap::new(),
            warnings: BTreeMap::new(),
            size: 0,
            max_size,
        }
    }

    /// Appends a record under `query.<module>` if it fits the size budget.
    pub fn try_add(&mut self, module: &str, record: Value) -> bool {
        let cost = record_size(&record);
        if self.size + cost > self.max_size {
            return false;
        }
        self.size += cost;
        self.lists.entry(module.to_string()).or_default().push(record);
        true
    }

    /// Makes sure `query.<module>` exists even when nothing was added.
    pub fn touch(&mut self, module: &str) {
        self.lists.entry(module.to_string()).or_default();
    }

    pub fn add_warning(&mut self, module: &str, message: impl Into<String>) {
        self.warnings
            .entry(module.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.size)
    }

    pub fn list(&self, module: &str) -> Option<&[Value]> {
        self.lists.get(module).map(Vec::as_slice)
    }

    pub fn warnings(&self) -> &BTreeMap<String, Vec<String>> {
        &self.warnings
    }

    pub fn into_parts(self) -> (Map<String, Value>, Option<Value>) {
        let mut query = Map::new();
        for (module, records) in self.lists {
            query.insert(module, Value::Array(records));
        }
        let warnings = if self.warnings.is_empty() {
            None
        } else {
            let mut out = Map::new();
            for (module, messages) in self.warnings {
                out.insert(
                    module,
                    Value::Array(messages.into_iter().map(Value::String).collect()),
                );
            }
            Some(Value::Object(out))
        };
        (query, warnings)
    }
}

pub fn record_size(record: &Value) -> usize {
    serde_json::to_string(record).map(|text| text.len()).unwrap_or(0)
}
