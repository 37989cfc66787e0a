//! List modules and the name-based dispatch over them.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde_json::{Map, json};

use crate::continuation::ContinuationValue;
use crate::error::{QueryError, QueryResult};
use crate::executor::{
    ExecutionMode, ListModule, ListOutcome, ListRequest, ListSink, run_list, validate_list,
};
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds};
use crate::select::SelectBuilder;
use crate::timestamp::MwTimestamp;
use crate::title::{Title, prefixed_text, text_to_dbkey};

pub mod alllinks;
pub mod allpages;
pub mod allrevisions;
pub mod backlinks;
pub mod categorymembers;
pub mod deletedrevisions;
pub mod info;
pub mod recentchanges;
pub mod usercontribs;

use alllinks::AllLinks;
use allpages::AllPages;
use allrevisions::AllRevisions;
use backlinks::Backlinks;
use categorymembers::CategoryMembers;
use deletedrevisions::AllDeletedRevisions;
use recentchanges::RecentChanges;
use usercontribs::UserContribs;

/// Every list module, usable as `list=` or `generator=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListModuleKind {
    AllPages,
    AllRevisions,
    AllDeletedRevisions,
    CategoryMembers,
    Backlinks,
    AllLinks,
    RecentChanges,
    UserContribs,
}

macro_rules! with_module {
    ($kind:expr, $module:ident => $body:expr) => {
        match $kind {
            ListModuleKind::AllPages => {
                let $module = AllPages;
                $body
            }
            ListModuleKind::AllRevisions => {
                let $module = AllRevisions;
                $body
            }
            ListModuleKind::AllDeletedRevisions => {
                let $module = AllDeletedRevisions;
                $body
            }
            ListModuleKind::CategoryMembers => {
                let $module = CategoryMembers;
                $body
            }
            ListModuleKind::Backlinks => {
                let $module = Backlinks;
                $body
            }
            ListModuleKind::AllLinks => {
                let $module = AllLinks;
                $body
            }
            ListModuleKind::RecentChanges => {
                let $module = RecentChanges;
                $body
            }
            ListModuleKind::UserContribs => {
                let $module = UserContribs;
                $body
            }
        }
    };
}

impl ListModuleKind {
    pub const ALL: &'static [Self] = &[
        Self::AllPages,
        Self::AllRevisions,
        Self::AllDeletedRevisions,
        Self::CategoryMembers,
        Self::Backlinks,
        Self::AllLinks,
        Self::RecentChanges,
        Self::UserContribs,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == name.trim())
    }

    pub fn name(self) -> &'static str {
        with_module!(self, module => module.name())
    }

    pub fn prefix(self) -> &'static str {
        with_module!(self, module => module.prefix())
    }

    pub fn is_volatile(self) -> bool {
        with_module!(self, module => module.is_volatile())
    }

    /// Parameter prefix for the given mode: generators read `g`-prefixed names.
    pub fn param_prefix(self, mode: ExecutionMode) -> String {
        match mode {
            ExecutionMode::List => self.prefix().to_string(),
            ExecutionMode::Generator => format!("g{}", self.prefix()),
        }
    }

    pub fn validate(
        self,
        connection: &Connection,
        request: &ListRequest<'_>,
        mode: ExecutionMode,
    ) -> QueryResult<()> {
        with_module!(self, module => validate_list(connection, &module, request, mode))
    }

    pub fn run(
        self,
        connection: &Connection,
        request: &ListRequest<'_>,
        sink: &mut dyn ListSink,
    ) -> QueryResult<ListOutcome> {
        with_module!(self, module => run_list(connection, &module, request, sink))
    }
}

/// `start`/`end` timestamps as traversal bounds. `start` must not lie past
/// `end` in the traversal direction.
pub(crate) fn timestamp_bounds(
    params: &ModuleParams<'_>,
    direction: Direction,
) -> QueryResult<RangeBounds> {
    let start = params.timestamp("start")?;
    let end = params.timestamp("end")?;
    if let (Some(start), Some(end)) = (&start, &end) {
        let out_of_order = match direction {
            Direction::Ascending => start > end,
            Direction::Descending => start < end,
        };
        if out_of_order {
            let expected = match direction {
                Direction::Ascending => "before",
                Direction::Descending => "after",
            };
            return Err(QueryError::InvalidParameterCombination(format!(
                "{} must be {expected} {} for dir={}",
                params.name("start"),
                params.name("end"),
                match direction {
                    Direction::Ascending => "newer",
                    Direction::Descending => "older",
                }
            )));
        }
    }
    Ok(RangeBounds {
        from: start.map(ContinuationValue::Timestamp),
        until: end.map(ContinuationValue::Timestamp),
    })
}

pub(crate) fn read_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<MwTimestamp> {
    let raw: String = row.get(index)?;
    MwTimestamp::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            format!("invalid stored timestamp {raw:?}").into(),
        )
    })
}

/// A title-valued parameter, normalized.
pub(crate) fn title_param(params: &ModuleParams<'_>, param: &str) -> QueryResult<Option<Title>> {
    match params.get(param) {
        None => Ok(None),
        Some(raw) => Title::parse(raw)
            .map(Some)
            .ok_or_else(|| QueryError::invalid_parameter(params.name(param), raw, "bad title")),
    }
}

/// A title fragment (`from`, `to`, `prefix`) in DB-key form.
pub(crate) fn dbkey_param(params: &ModuleParams<'_>, param: &str) -> Option<String> {
    params
        .text(param)
        .map(|text| text_to_dbkey(&text))
        .filter(|dbkey| !dbkey.is_empty())
}

pub(crate) fn user_name(name: &str) -> String {
    text_to_dbkey(name).replace('_', " ")
}

pub(crate) fn int_values(values: &[i64]) -> Vec<Value> {
    values.iter().map(|value| Value::Integer(*value)).collect()
}

pub(crate) fn text_values(values: &[String]) -> Vec<Value> {
    values.iter().map(|value| Value::Text(value.clone())).collect()
}

/// Parses a `show` style parameter where `x` and `!x` contradict each other.
pub(crate) fn show_flags(
    params: &ModuleParams<'_>,
    allowed: &[&'static str],
) -> QueryResult<Vec<&'static str>> {
    let flags = params.choices("show", allowed)?;
    for flag in &flags {
        if let Some(positive) = flag.strip_prefix('!')
            && flags.contains(&positive)
        {
            return Err(QueryError::InvalidParameterCombination(format!(
                "incorrect parameter: mutually exclusive values {positive} and !{positive} in {}",
                params.name("show")
            )));
        }
    }
    Ok(flags)
}

/// Namespace of the page with this id, if it exists.
pub(crate) fn page_namespace(connection: &Connection, page_id: i64) -> QueryResult<Option<i64>> {
    let mut builder = SelectBuilder::new("page");
    builder
        .field("page_namespace")
        .where_eq("page_id", page_id)
        .limit(1);
    let found = builder.fetch(connection, |row| row.get::<_, i64>(0))?;
    Ok(found.into_iter().next())
}

/// `{pageid, ns, title}`; a zero page id is left out.
pub(crate) fn page_fields(page_id: i64, namespace: i64, dbkey: &str) -> Map<String, serde_json::Value> {
    let mut record = Map::new();
    if page_id > 0 {
        record.insert("pageid".to_string(), json!(page_id));
    }
    record.insert("ns".to_string(), json!(namespace));
    record.insert("title".to_string(), json!(prefixed_text(namespace, dbkey)));
    record
}
