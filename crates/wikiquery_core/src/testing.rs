//! Shared fixtures for unit tests.

use rusqlite::Connection;
use serde_json::Value;

use crate::config::ApiLimits;
use crate::error::QueryResult;
use crate::executor::{ListModule, ListOutcome, ListRequest, ResultSink, run_list};
use crate::migrate::migrate_connection;
use crate::pageset::GeneratorPolicy;
use crate::params::RequestParams;
use crate::result::ApiResult;
use crate::store::{WikiFixture, import_fixture};

pub const SMALL_WIKI_JSON: &str = include_str!("testdata/small_wiki.json");

/// In-memory store, migrated and loaded with `testdata/small_wiki.json`.
pub fn small_wiki() -> Connection {
    let mut connection = Connection::open_in_memory().expect("open in-memory db");
    migrate_connection(&connection).expect("migrate");
    let fixture: WikiFixture = serde_json::from_str(SMALL_WIKI_JSON).expect("parse fixture");
    import_fixture(&mut connection, &fixture).expect("import fixture");
    connection
}

pub fn request(pairs: &[&str]) -> RequestParams {
    RequestParams::from_pairs(pairs.iter().copied())
}

/// Runs one list batch with default limits and returns the emitted records.
pub fn run_module<M: ListModule>(
    connection: &Connection,
    module: &M,
    pairs: &[&str],
) -> QueryResult<(Vec<Value>, ListOutcome)> {
    let params = request(pairs);
    let limits = ApiLimits::default();
    let list_request = ListRequest {
        params: params.for_module(module.prefix()),
        limits: &limits,
        privileged: false,
        policy: GeneratorPolicy::default(),
    };
    let mut result = ApiResult::new(limits.max_result_size);
    let outcome = {
        let mut sink = ResultSink::new(&mut result, module.name());
        run_list(connection, module, &list_request, &mut sink)?
    };
    let records = result.list(module.name()).unwrap_or_default().to_vec();
    Ok((records, outcome))
}

/// Pulls a string field out of every record.
pub fn field(records: &[Value], name: &str) -> Vec<String> {
    records
        .iter()
        .map(|record| match &record[name] {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect()
}
