//! `list=alldeletedrevisions`: archived revisions, either one user's by
//! time or everything by page.

use rusqlite::Row;
use serde_json::{Value, json};

use super::{dbkey_param, int_values, page_fields, read_timestamp, timestamp_bounds, user_name};
use crate::continuation::ContinuationValue;
use crate::error::QueryResult;
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortField, SortKey};
use crate::select::{Comparison, SelectBuilder};
use crate::timestamp::MwTimestamp;

pub struct AllDeletedRevisions;

#[derive(Debug, Clone)]
pub enum ArchiveMode {
    /// One user's deletions, ordered by time.
    User(String),
    /// Every deletion, grouped by page.
    All {
        from: Option<String>,
        to: Option<String>,
        prefix: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct DeletedRevisionsOptions {
    mode: ArchiveMode,
    direction: Direction,
    bounds: RangeBounds,
    namespaces: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct ArchiveRow {
    id: i64,
    namespace: i64,
    title: String,
    timestamp: MwTimestamp,
    user: String,
    rev_id: i64,
    minor: bool,
    size: i64,
    comment: String,
}

impl ListModule for AllDeletedRevisions {
    type Options = DeletedRevisionsOptions;
    type Row = ArchiveRow;

    fn name(&self) -> &'static str {
        "alldeletedrevisions"
    }

    fn prefix(&self) -> &'static str {
        "adr"
    }

    fn is_volatile(&self) -> bool {
        true
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<DeletedRevisionsOptions> {
        let user = params.text("user").map(|user| user_name(&user));
        let by_user = user.is_some();
        for param in ["start", "end"] {
            params.reject_unless(param, by_user, "together with a user")?;
        }
        for param in ["from", "to", "prefix"] {
            params.reject_unless(param, !by_user, "without a user")?;
        }

        let direction = params.direction(Direction::Descending)?;
        let (mode, bounds) = match user {
            Some(user) => (ArchiveMode::User(user), timestamp_bounds(params, direction)?),
            None => (
                ArchiveMode::All {
                    from: dbkey_param(params, "from"),
                    to: dbkey_param(params, "to"),
                    prefix: dbkey_param(params, "prefix"),
                },
                RangeBounds::default(),
            ),
        };
        Ok(DeletedRevisionsOptions {
            mode,
            direction,
            bounds,
            namespaces: params.ints("namespace")?,
        })
    }

    fn sort_key(&self, options: &DeletedRevisionsOptions) -> SortKey {
        match options.mode {
            ArchiveMode::User(_) => SortKey::with_tiebreak(
                vec![SortField::timestamp("ar_timestamp")],
                SortField::int("ar_id"),
            ),
            ArchiveMode::All { .. } => SortKey::with_tiebreak(
                vec![
                    SortField::int("ar_namespace"),
                    SortField::string("ar_title"),
                    SortField::timestamp("ar_timestamp"),
                ],
                SortField::int("ar_id"),
            ),
        }
    }

    fn direction(&self, options: &DeletedRevisionsOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &DeletedRevisionsOptions) -> RangeBounds {
        options.bounds.clone()
    }

    fn build_query(&self, options: &DeletedRevisionsOptions) -> SelectBuilder {
        let mut builder = SelectBuilder::new("archive");
        builder.fields(&[
            "ar_id",
            "ar_namespace",
            "ar_title",
            "ar_timestamp",
            "ar_user_text",
            "ar_rev_id",
            "ar_minor_edit",
            "ar_len",
            "ar_comment",
        ]);
        if !options.namespaces.is_empty() {
            builder.where_in("ar_namespace", int_values(&options.namespaces));
        }
        match &options.mode {
            ArchiveMode::User(user) => {
                builder.where_eq("ar_user_text", user.clone());
            }
            // Title bounds sit behind the namespace column, so they are plain filters.
            ArchiveMode::All { from, to, prefix } => {
                let (onward, until) = match options.direction {
                    Direction::Ascending => (Comparison::Ge, Comparison::Le),
                    Direction::Descending => (Comparison::Le, Comparison::Ge),
                };
                if let Some(from) = from {
                    builder.where_cmp("ar_title", onward, from.clone());
                }
                if let Some(to) = to {
                    builder.where_cmp("ar_title", until, to.clone());
                }
                if let Some(prefix) = prefix {
                    builder.where_prefix("ar_title", prefix);
                }
            }
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<ArchiveRow> {
        Ok(ArchiveRow {
            id: row.get(0)?,
            namespace: row.get(1)?,
            title: row.get(2)?,
            timestamp: read_timestamp(row, 3)?,
            user: row.get(4)?,
            rev_id: row.get(5)?,
            minor: row.get(6)?,
            size: row.get(7)?,
            comment: row.get(8)?,
        })
    }

    fn sort_values(&self, options: &DeletedRevisionsOptions, row: &ArchiveRow) -> Vec<ContinuationValue> {
        match options.mode {
            ArchiveMode::User(_) => vec![
                ContinuationValue::Timestamp(row.timestamp.clone()),
                ContinuationValue::Int(row.id),
            ],
            ArchiveMode::All { .. } => vec![
                ContinuationValue::Int(row.namespace),
                ContinuationValue::String(row.title.clone()),
                ContinuationValue::Timestamp(row.timestamp.clone()),
                ContinuationValue::Int(row.id),
            ],
        }
    }

    fn render(&self, _options: &DeletedRevisionsOptions, row: &ArchiveRow) -> Value {
        let mut record = page_fields(0, row.namespace, &row.title);
        record.insert("revid".to_string(), json!(row.rev_id));
        record.insert("user".to_string(), json!(row.user));
        record.insert("timestamp".to_string(), json!(row.timestamp));
        record.insert("size".to_string(), json!(row.size));
        if row.minor {
            record.insert("minor".to_string(), json!(true));
        }
        record.insert("comment".to_string(), json!(row.comment));
        record.insert("archiveid".to_string(), json!(row.id));
        Value::Object(record)
    }

    // Deleted pages have no live id.
    fn page_ref(&self, _options: &DeletedRevisionsOptions, row: &ArchiveRow) -> PageRef {
        PageRef::by_title(row.namespace, &row.title)
    }
}

#[cfg(test)]
mod tests {
    use super::AllDeletedRevisions;
    use crate::executor::ContinuationOutcome;
    use crate::testing::{field, run_module, small_wiki};

    #[test]
    fn user_mode_orders_by_time_and_breaks_ties_by_id() {
        let connection = small_wiki();
        let (records, outcome) = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adruser=Alice", "adrlimit=1"],
        )
        .expect("first");
        assert_eq!(field(&records, "archiveid"), ["5"]);
        assert_eq!(
            outcome.continuation,
            ContinuationOutcome::Resume("20231203000000|5".to_string())
        );

        let (records, _) = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adruser=Alice", "adrcontinue=20231203000000|5"],
        )
        .expect("rest");
        assert_eq!(field(&records, "archiveid"), ["3", "1"]);
    }

    #[test]
    fn all_mode_groups_by_page() {
        let connection = small_wiki();
        let (records, outcome) = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adrdir=newer", "adrlimit=2"],
        )
        .expect("all mode");
        assert_eq!(field(&records, "title"), ["Epsilon", "Omega"]);
        assert_eq!(
            outcome.continuation,
            ContinuationOutcome::Resume("0|Omega|20231201000000|1".to_string())
        );

        let (records, _) = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adrdir=newer", "adrcontinue=0|Omega|20231201000000|1"],
        )
        .expect("resume");
        assert_eq!(field(&records, "archiveid"), ["2", "5", "4"]);
        assert_eq!(records[2]["title"], "Talk:Omega");
    }

    #[test]
    fn all_mode_prefix_filter() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adrdir=newer", "adrprefix=O", "adrnamespace=0"],
        )
        .expect("prefix");
        assert_eq!(field(&records, "archiveid"), ["1", "2"]);
    }

    #[test]
    fn mode_specific_parameters_are_enforced() {
        let connection = small_wiki();
        let error = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adrstart=20231201000000"],
        )
        .expect_err("start without user");
        assert_eq!(error.code(), "invalidparammix");

        let error = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adruser=Alice", "adrfrom=Omega"],
        )
        .expect_err("from with user");
        assert_eq!(error.code(), "invalidparammix");
    }

    #[test]
    fn continuation_arity_depends_on_mode() {
        let connection = small_wiki();
        let error = run_module(
            &connection,
            &AllDeletedRevisions,
            &["adrcontinue=20231203000000|5"],
        )
        .expect_err("user-mode token in all mode");
        assert_eq!(error.code(), "badcontinue");
    }
}
