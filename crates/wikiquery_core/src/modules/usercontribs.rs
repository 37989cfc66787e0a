//! `list=usercontribs`: revisions made by one or more users.

use rusqlite::Row;
use serde_json::Value;

use super::allrevisions::{RevisionRow, revision_query, revision_sort_key};
use super::{int_values, show_flags, text_values, timestamp_bounds, user_name};
use crate::continuation::ContinuationValue;
use crate::error::{QueryError, QueryResult};
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortKey};
use crate::select::SelectBuilder;

pub struct UserContribs;

#[derive(Debug, Clone)]
pub struct UserContribsOptions {
    users: Vec<String>,
    direction: Direction,
    bounds: RangeBounds,
    namespaces: Vec<i64>,
    minor: Option<bool>,
}

impl ListModule for UserContribs {
    type Options = UserContribsOptions;
    type Row = RevisionRow;

    fn name(&self) -> &'static str {
        "usercontribs"
    }

    fn prefix(&self) -> &'static str {
        "uc"
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<UserContribsOptions> {
        let mut users: Vec<String> = Vec::new();
        for user in params.multi("user") {
            let name = user_name(&user);
            if !name.is_empty() && !users.contains(&name) {
                users.push(name);
            }
        }
        if users.is_empty() {
            return Err(QueryError::MissingParameter(params.name("user")));
        }
        let direction = params.direction(Direction::Descending)?;
        let show = show_flags(params, &["minor", "!minor"])?;
        let minor = match show.first() {
            Some(&"minor") => Some(true),
            Some(_) => Some(false),
            None => None,
        };
        Ok(UserContribsOptions {
            users,
            bounds: timestamp_bounds(params, direction)?,
            direction,
            namespaces: params.ints("namespace")?,
            minor,
        })
    }

    fn sort_key(&self, _options: &UserContribsOptions) -> SortKey {
        revision_sort_key()
    }

    fn direction(&self, options: &UserContribsOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &UserContribsOptions) -> RangeBounds {
        options.bounds.clone()
    }

    fn build_query(&self, options: &UserContribsOptions) -> SelectBuilder {
        let mut builder = revision_query();
        builder.where_in("rev_user_text", text_values(&options.users));
        if !options.namespaces.is_empty() {
            builder.where_in("page_namespace", int_values(&options.namespaces));
        }
        if let Some(minor) = options.minor {
            builder.where_eq("rev_minor_edit", minor);
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<RevisionRow> {
        RevisionRow::from_row(row)
    }

    fn sort_values(&self, _options: &UserContribsOptions, row: &RevisionRow) -> Vec<ContinuationValue> {
        row.sort_values()
    }

    fn render(&self, _options: &UserContribsOptions, row: &RevisionRow) -> Value {
        row.render()
    }

    fn page_ref(&self, _options: &UserContribsOptions, row: &RevisionRow) -> PageRef {
        row.page_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::UserContribs;
    use crate::executor::ContinuationOutcome;
    use crate::testing::{field, run_module, small_wiki};

    #[test]
    fn one_users_edits_newest_first() {
        let connection = small_wiki();
        let (records, outcome) =
            run_module(&connection, &UserContribs, &["ucuser=Bob"]).expect("contribs");
        assert_eq!(field(&records, "revid"), ["14", "11", "7", "3", "2"]);
        assert!(records.iter().all(|record| record["user"] == "Bob"));
        assert_eq!(outcome.continuation, ContinuationOutcome::Complete);
    }

    #[test]
    fn several_users_in_one_namespace() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &UserContribs,
            &["ucuser=Alice|carol", "ucnamespace=0", "ucdir=newer"],
        )
        .expect("contribs");
        assert_eq!(field(&records, "revid"), ["1", "4", "5", "6", "8"]);
    }

    #[test]
    fn minor_filter_and_resume() {
        let connection = small_wiki();
        let (records, outcome) = run_module(
            &connection,
            &UserContribs,
            &["ucuser=Alice", "ucshow=!minor", "uclimit=2"],
        )
        .expect("first");
        assert_eq!(field(&records, "revid"), ["13", "9"]);
        let ContinuationOutcome::Resume(token) = outcome.continuation else {
            panic!("expected a token");
        };

        let continue_param = format!("uccontinue={token}");
        let (records, _) = run_module(
            &connection,
            &UserContribs,
            &["ucuser=Alice", "ucshow=!minor", continue_param.as_str()],
        )
        .expect("rest");
        assert_eq!(field(&records, "revid"), ["6", "4", "1"]);
    }

    #[test]
    fn user_is_required() {
        let connection = small_wiki();
        let error = run_module(&connection, &UserContribs, &["ucnamespace=0"])
            .expect_err("must fail");
        assert_eq!(error.code(), "missingparam");
    }
}
