//! `list=backlinks`: pages linking to a given page.

use rusqlite::{Connection, Row};
use rusqlite::types::Value as SqlValue;
use serde_json::{Value, json};

use super::{int_values, page_fields, page_namespace, title_param};
use crate::continuation::ContinuationValue;
use crate::error::{QueryError, QueryResult};
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, SortField, SortKey};
use crate::select::SelectBuilder;
use crate::title::Title;

pub struct Backlinks;

#[derive(Debug, Clone)]
pub enum LinkTarget {
    Title(Title),
    PageId { page_id: i64, param: String },
}

#[derive(Debug, Clone)]
pub struct BacklinksOptions {
    target: LinkTarget,
    namespaces: Vec<i64>,
    filter_redirects: &'static str,
    direction: Direction,
}

#[derive(Debug, Clone)]
pub struct BacklinkRow {
    page_id: i64,
    namespace: i64,
    title: String,
    redirect: bool,
}

impl ListModule for Backlinks {
    type Options = BacklinksOptions;
    type Row = BacklinkRow;

    fn name(&self) -> &'static str {
        "backlinks"
    }

    fn prefix(&self) -> &'static str {
        "bl"
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<BacklinksOptions> {
        params.require_one_of(&["title", "pageid"])?;
        let target = match title_param(params, "title")? {
            Some(title) => LinkTarget::Title(title),
            None => LinkTarget::PageId {
                page_id: params
                    .int("pageid")?
                    .ok_or_else(|| QueryError::MissingParameter(params.name("pageid")))?,
                param: params.name("pageid"),
            },
        };
        Ok(BacklinksOptions {
            target,
            namespaces: params.ints("namespace")?,
            filter_redirects: params.choice(
                "filterredir",
                &["all", "redirects", "nonredirects"],
                "all",
            )?,
            direction: params.direction(Direction::Ascending)?,
        })
    }

    fn check_targets(
        &self,
        connection: &Connection,
        options: &BacklinksOptions,
    ) -> QueryResult<()> {
        let LinkTarget::PageId { page_id, param } = &options.target else {
            return Ok(());
        };
        if page_namespace(connection, *page_id)?.is_none() {
            return Err(QueryError::invalid_parameter(
                param.clone(),
                page_id.to_string(),
                "no page with this id",
            ));
        }
        Ok(())
    }

    // The link source is unique once the target is fixed.
    fn sort_key(&self, _options: &BacklinksOptions) -> SortKey {
        SortKey::unique(vec![SortField::int("pl_from")])
    }

    fn direction(&self, options: &BacklinksOptions) -> Direction {
        options.direction
    }

    fn build_query(&self, options: &BacklinksOptions) -> SelectBuilder {
        let mut builder = SelectBuilder::new("pagelinks");
        builder.join("page", "page_id = pl_from").fields(&[
            "pl_from",
            "page_namespace",
            "page_title",
            "page_is_redirect",
        ]);
        match &options.target {
            LinkTarget::Title(title) => {
                builder
                    .where_eq("pl_namespace", title.namespace)
                    .where_eq("pl_title", title.dbkey.clone());
            }
            LinkTarget::PageId { page_id, .. } => {
                builder.where_raw(
                    "(pl_namespace, pl_title) = (SELECT page_namespace, page_title FROM page WHERE page_id = ?)",
                    vec![SqlValue::Integer(*page_id)],
                );
            }
        }
        if !options.namespaces.is_empty() {
            builder.where_in("pl_from_namespace", int_values(&options.namespaces));
        }
        match options.filter_redirects {
            "redirects" => {
                builder.where_eq("page_is_redirect", 1);
            }
            "nonredirects" => {
                builder.where_eq("page_is_redirect", 0);
            }
            _ => {}
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<BacklinkRow> {
        Ok(BacklinkRow {
            page_id: row.get(0)?,
            namespace: row.get(1)?,
            title: row.get(2)?,
            redirect: row.get(3)?,
        })
    }

    fn sort_values(&self, _options: &BacklinksOptions, row: &BacklinkRow) -> Vec<ContinuationValue> {
        vec![ContinuationValue::Int(row.page_id)]
    }

    fn render(&self, _options: &BacklinksOptions, row: &BacklinkRow) -> Value {
        let mut record = page_fields(row.page_id, row.namespace, &row.title);
        if row.redirect {
            record.insert("redirect".to_string(), json!(true));
        }
        Value::Object(record)
    }

    fn page_ref(&self, _options: &BacklinksOptions, row: &BacklinkRow) -> PageRef {
        PageRef::page(row.page_id, row.namespace, &row.title)
    }
}
