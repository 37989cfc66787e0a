//! `list=allrevisions`: every revision on the wiki, newest first by default.

use rusqlite::Row;
use serde_json::{Value, json};

use super::{int_values, page_fields, read_timestamp, timestamp_bounds, user_name};
use crate::continuation::ContinuationValue;
use crate::error::QueryResult;
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortField, SortKey};
use crate::select::{Comparison, SelectBuilder};
use crate::timestamp::MwTimestamp;

pub struct AllRevisions;

#[derive(Debug, Clone)]
pub enum UserFilter {
    Only(String),
    Excluding(String),
}

#[derive(Debug, Clone)]
pub struct AllRevisionsOptions {
    direction: Direction,
    bounds: RangeBounds,
    user: Option<UserFilter>,
    namespaces: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct RevisionRow {
    pub(crate) rev_id: i64,
    pub(crate) parent_id: i64,
    pub(crate) timestamp: MwTimestamp,
    pub(crate) user: String,
    pub(crate) minor: bool,
    pub(crate) size: i64,
    pub(crate) comment: String,
    pub(crate) page_id: i64,
    pub(crate) namespace: i64,
    pub(crate) title: String,
}

pub(crate) const REVISION_FIELDS: &[&str] = &[
    "rev_id",
    "rev_parent_id",
    "rev_timestamp",
    "rev_user_text",
    "rev_minor_edit",
    "rev_len",
    "rev_comment",
    "page_id",
    "page_namespace",
    "page_title",
];

impl RevisionRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rev_id: row.get(0)?,
            parent_id: row.get(1)?,
            timestamp: read_timestamp(row, 2)?,
            user: row.get(3)?,
            minor: row.get(4)?,
            size: row.get(5)?,
            comment: row.get(6)?,
            page_id: row.get(7)?,
            namespace: row.get(8)?,
            title: row.get(9)?,
        })
    }

    pub(crate) fn sort_values(&self) -> Vec<ContinuationValue> {
        vec![
            ContinuationValue::Timestamp(self.timestamp.clone()),
            ContinuationValue::Int(self.rev_id),
        ]
    }

    pub(crate) fn render(&self) -> Value {
        let mut record = page_fields(self.page_id, self.namespace, &self.title);
        record.insert("revid".to_string(), json!(self.rev_id));
        record.insert("parentid".to_string(), json!(self.parent_id));
        record.insert("user".to_string(), json!(self.user));
        record.insert("timestamp".to_string(), json!(self.timestamp));
        record.insert("size".to_string(), json!(self.size));
        if self.minor {
            record.insert("minor".to_string(), json!(true));
        }
        record.insert("comment".to_string(), json!(self.comment));
        Value::Object(record)
    }

    pub(crate) fn page_ref(&self) -> PageRef {
        PageRef::page(self.page_id, self.namespace, &self.title)
    }
}

pub(crate) fn revision_sort_key() -> SortKey {
    SortKey::with_tiebreak(
        vec![SortField::timestamp("rev_timestamp")],
        SortField::int("rev_id"),
    )
}

pub(crate) fn revision_query() -> SelectBuilder {
    let mut builder = SelectBuilder::new("revision");
    builder
        .join("page", "page_id = rev_page")
        .fields(REVISION_FIELDS);
    builder
}

impl ListModule for AllRevisions {
    type Options = AllRevisionsOptions;
    type Row = RevisionRow;

    fn name(&self) -> &'static str {
        "allrevisions"
    }

    fn prefix(&self) -> &'static str {
        "arv"
    }

    fn is_volatile(&self) -> bool {
        true
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<AllRevisionsOptions> {
        params.require_max_one_of(&["user", "excludeuser"])?;
        let direction = params.direction(Direction::Descending)?;
        let user = match (params.text("user"), params.text("excludeuser")) {
            (Some(user), _) => Some(UserFilter::Only(user_name(&user))),
            (None, Some(user)) => Some(UserFilter::Excluding(user_name(&user))),
            (None, None) => None,
        };
        Ok(AllRevisionsOptions {
            bounds: timestamp_bounds(params, direction)?,
            direction,
            user,
            namespaces: params.ints("namespace")?,
        })
    }

    fn sort_key(&self, _options: &AllRevisionsOptions) -> SortKey {
        revision_sort_key()
    }

    fn direction(&self, options: &AllRevisionsOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &AllRevisionsOptions) -> RangeBounds {
        options.bounds.clone()
    }

    fn build_query(&self, options: &AllRevisionsOptions) -> SelectBuilder {
        let mut builder = revision_query();
        match &options.user {
            Some(UserFilter::Only(user)) => {
                builder.where_eq("rev_user_text", user.clone());
            }
            Some(UserFilter::Excluding(user)) => {
                builder.where_cmp("rev_user_text", Comparison::Ne, user.clone());
            }
            None => {}
        }
        if !options.namespaces.is_empty() {
            builder.where_in("page_namespace", int_values(&options.namespaces));
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<RevisionRow> {
        RevisionRow::from_row(row)
    }

    fn sort_values(&self, _options: &AllRevisionsOptions, row: &RevisionRow) -> Vec<ContinuationValue> {
        row.sort_values()
    }

    fn render(&self, _options: &AllRevisionsOptions, row: &RevisionRow) -> Value {
        row.render()
    }

    fn page_ref(&self, _options: &AllRevisionsOptions, row: &RevisionRow) -> PageRef {
        row.page_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::AllRevisions;
    use crate::executor::ContinuationOutcome;
    use crate::testing::{field, run_module, small_wiki};

    #[test]
    fn newest_first_with_timestamp_ties_broken_by_id() {
        let connection = small_wiki();
        let (records, outcome) =
            run_module(&connection, &AllRevisions, &["arvlimit=3"]).expect("first batch");
        assert_eq!(field(&records, "revid"), ["14", "13", "12"]);
        assert_eq!(records[0]["timestamp"], "2024-01-11T00:00:00Z");
        let ContinuationOutcome::Resume(token) = outcome.continuation else {
            panic!("expected a token");
        };
        assert_eq!(token, "20240110000000|12");

        let continue_param = format!("arvcontinue={token}");
        let (records, _) = run_module(
            &connection,
            &AllRevisions,
            &["arvlimit=3", continue_param.as_str()],
        )
        .expect("second batch");
        assert_eq!(field(&records, "revid"), ["11", "10", "9"]);
    }

    #[test]
    fn user_and_namespace_filters() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &AllRevisions,
            &["arvuser=alice", "arvdir=newer", "arvlimit=max"],
        )
        .expect("user");
        assert_eq!(field(&records, "revid"), ["1", "4", "6", "8", "9", "13"]);

        let (records, _) = run_module(
            &connection,
            &AllRevisions,
            &["arvexcludeuser=Alice", "arvnamespace=0"],
        )
        .expect("excludeuser");
        assert_eq!(field(&records, "revid"), ["11", "7", "5", "3", "2"]);
    }

    #[test]
    fn start_and_end_bound_the_timeline() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &AllRevisions,
            &[
                "arvdir=newer",
                "arvstart=2024-01-03T00:00:00Z",
                "arvend=20240105000000",
            ],
        )
        .expect("range");
        assert_eq!(field(&records, "revid"), ["4", "5", "6", "7"]);
    }

    #[test]
    fn user_and_excludeuser_conflict() {
        let connection = small_wiki();
        let error = run_module(
            &connection,
            &AllRevisions,
            &["arvuser=Alice", "arvexcludeuser=Bob"],
        )
        .expect_err("must fail");
        assert_eq!(error.code(), "invalidparammix");
    }

    #[test]
    fn minor_edits_are_flagged() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &AllRevisions,
            &["arvdir=newer", "arvlimit=3"],
        )
        .expect("batch");
        assert_eq!(records[2]["revid"], 3);
        assert_eq!(records[2]["minor"], true);
        assert!(records[0].get("minor").is_none());
        assert_eq!(records[0]["title"], "Alpha");
    }
}
