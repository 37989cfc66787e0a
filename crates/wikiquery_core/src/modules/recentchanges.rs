//! `list=recentchanges`: the recent changes feed.

use rusqlite::Row;
use rusqlite::types::Value as SqlValue;
use serde_json::{Value, json};

use super::{int_values, page_fields, read_timestamp, show_flags, timestamp_bounds, user_name};
use crate::continuation::ContinuationValue;
use crate::error::QueryResult;
use crate::executor::{ExecutionMode, ListModule};
use crate::modules::allrevisions::UserFilter;
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortField, SortKey};
use crate::select::{Comparison, SelectBuilder};
use crate::timestamp::MwTimestamp;

pub struct RecentChanges;

const CHANGE_TYPES: &[&str] = &["edit", "new", "log", "external", "categorize"];
const SHOW_FLAGS: &[&str] = &["minor", "!minor", "bot", "!bot"];

#[derive(Debug, Clone)]
pub struct RecentChangesOptions {
    direction: Direction,
    bounds: RangeBounds,
    namespaces: Vec<i64>,
    user: Option<UserFilter>,
    types: Vec<&'static str>,
    show: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ChangeRow {
    rc_id: i64,
    timestamp: MwTimestamp,
    namespace: i64,
    title: String,
    page_id: i64,
    rev_id: i64,
    user: String,
    change_type: String,
    minor: bool,
    bot: bool,
    comment: String,
}

impl ListModule for RecentChanges {
    type Options = RecentChangesOptions;
    type Row = ChangeRow;

    fn name(&self) -> &'static str {
        "recentchanges"
    }

    fn prefix(&self) -> &'static str {
        "rc"
    }

    fn is_volatile(&self) -> bool {
        true
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<RecentChangesOptions> {
        params.require_max_one_of(&["user", "excludeuser"])?;
        let direction = params.direction(Direction::Descending)?;
        let user = match (params.text("user"), params.text("excludeuser")) {
            (Some(user), _) => Some(UserFilter::Only(user_name(&user))),
            (None, Some(user)) => Some(UserFilter::Excluding(user_name(&user))),
            (None, None) => None,
        };
        Ok(RecentChangesOptions {
            bounds: timestamp_bounds(params, direction)?,
            direction,
            namespaces: params.ints("namespace")?,
            user,
            types: params.choices("type", CHANGE_TYPES)?,
            show: show_flags(params, SHOW_FLAGS)?,
        })
    }

    fn sort_key(&self, _options: &RecentChangesOptions) -> SortKey {
        SortKey::with_tiebreak(
            vec![SortField::timestamp("rc_timestamp")],
            SortField::int("rc_id"),
        )
    }

    fn direction(&self, options: &RecentChangesOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &RecentChangesOptions) -> RangeBounds {
        options.bounds.clone()
    }

    fn build_query(&self, options: &RecentChangesOptions) -> SelectBuilder {
        let mut builder = SelectBuilder::new("recentchanges");
        builder.fields(&[
            "rc_id",
            "rc_timestamp",
            "rc_namespace",
            "rc_title",
            "rc_cur_id",
            "rc_this_oldid",
            "rc_user_text",
            "rc_type",
            "rc_minor",
            "rc_bot",
            "rc_comment",
        ]);
        if !options.namespaces.is_empty() {
            builder.where_in("rc_namespace", int_values(&options.namespaces));
        }
        match &options.user {
            Some(UserFilter::Only(user)) => {
                builder.where_eq("rc_user_text", user.clone());
            }
            Some(UserFilter::Excluding(user)) => {
                builder.where_cmp("rc_user_text", Comparison::Ne, user.clone());
            }
            None => {}
        }
        if !options.types.is_empty() {
            let types = options
                .types
                .iter()
                .map(|change_type| SqlValue::Text((*change_type).to_string()))
                .collect();
            builder.where_in("rc_type", types);
        }
        for flag in &options.show {
            let (column, value) = match *flag {
                "minor" => ("rc_minor", 1),
                "!minor" => ("rc_minor", 0),
                "bot" => ("rc_bot", 1),
                _ => ("rc_bot", 0),
            };
            builder.where_eq(column, value);
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<ChangeRow> {
        Ok(ChangeRow {
            rc_id: row.get(0)?,
            timestamp: read_timestamp(row, 1)?,
            namespace: row.get(2)?,
            title: row.get(3)?,
            page_id: row.get(4)?,
            rev_id: row.get(5)?,
            user: row.get(6)?,
            change_type: row.get(7)?,
            minor: row.get(8)?,
            bot: row.get(9)?,
            comment: row.get(10)?,
        })
    }

    fn sort_values(&self, _options: &RecentChangesOptions, row: &ChangeRow) -> Vec<ContinuationValue> {
        vec![
            ContinuationValue::Timestamp(row.timestamp.clone()),
            ContinuationValue::Int(row.rc_id),
        ]
    }

    fn render(&self, _options: &RecentChangesOptions, row: &ChangeRow) -> Value {
        let mut record = page_fields(row.page_id, row.namespace, &row.title);
        record.insert("type".to_string(), json!(row.change_type));
        record.insert("rcid".to_string(), json!(row.rc_id));
        record.insert("revid".to_string(), json!(row.rev_id));
        record.insert("user".to_string(), json!(row.user));
        record.insert("timestamp".to_string(), json!(row.timestamp));
        if row.minor {
            record.insert("minor".to_string(), json!(true));
        }
        if row.bot {
            record.insert("bot".to_string(), json!(true));
        }
        record.insert("comment".to_string(), json!(row.comment));
        Value::Object(record)
    }

    fn page_ref(&self, _options: &RecentChangesOptions, row: &ChangeRow) -> PageRef {
        PageRef::by_title(row.namespace, &row.title)
    }
}

#[cfg(test)]
mod tests {
    use super::RecentChanges;
    use crate::executor::ContinuationOutcome;
    use crate::testing::{field, run_module, small_wiki};

    #[test]
    fn newest_changes_first() {
        let connection = small_wiki();
        let (records, outcome) =
            run_module(&connection, &RecentChanges, &["rclimit=3"]).expect("feed");
        assert_eq!(field(&records, "rcid"), ["10", "9", "8"]);
        assert_eq!(records[0]["type"], "log");
        assert_eq!(records[0]["bot"], true);
        assert_eq!(
            outcome.continuation,
            ContinuationOutcome::Resume("20240108000000|8".to_string())
        );
    }

    #[test]
    fn show_and_type_filters() {
        let connection = small_wiki();
        let (records, _) =
            run_module(&connection, &RecentChanges, &["rcshow=minor"]).expect("minor");
        assert_eq!(field(&records, "rcid"), ["6", "3"]);

        let (records, _) = run_module(
            &connection,
            &RecentChanges,
            &["rctype=new", "rcnamespace=0", "rcdir=newer"],
        )
        .expect("new pages");
        assert_eq!(field(&records, "rcid"), ["1", "2", "4", "5", "9"]);

        let (records, _) = run_module(
            &connection,
            &RecentChanges,
            &["rcexcludeuser=Alice", "rcshow=!bot"],
        )
        .expect("humans other than Alice");
        assert_eq!(field(&records, "rcid"), ["9", "8", "3", "2"]);
    }

    #[test]
    fn start_bounds_an_older_walk() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &RecentChanges,
            &["rcstart=20240103000000", "rcend=20240102000000"],
        )
        .expect("window");
        assert_eq!(field(&records, "rcid"), ["5", "4", "3"]);
    }

    #[test]
    fn contradictory_show_flags_fail() {
        let connection = small_wiki();
        let error = run_module(&connection, &RecentChanges, &["rcshow=bot|!bot"])
            .expect_err("must fail");
        assert_eq!(error.code(), "invalidparammix");
    }
}
