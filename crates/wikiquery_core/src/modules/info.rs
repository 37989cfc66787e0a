//! `prop=info` and the page set it consumes.
//!
//! The page set comes from a generator or from explicit `titles=`/`pageids=`.
//! Every entry resolves to one record; unknown pages are reported `missing`
//! instead of being dropped.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde_json::{Value, json};

use super::{page_fields, read_timestamp};
use crate::error::{QueryError, QueryResult};
use crate::pageset::{PageRef, PageSet};
use crate::params::RequestParams;
use crate::select::SelectBuilder;
use crate::timestamp::MwTimestamp;
use crate::title::Title;

#[derive(Debug, Clone)]
struct PageRow {
    page_id: i64,
    namespace: i64,
    title: String,
    redirect: bool,
    length: i64,
    latest: i64,
    touched: MwTimestamp,
}

fn page_query() -> SelectBuilder {
    let mut builder = SelectBuilder::new("page");
    builder.fields(&[
        "page_id",
        "page_namespace",
        "page_title",
        "page_is_redirect",
        "page_len",
        "page_latest",
        "page_touched",
    ]);
    builder
}

fn map_page(row: &Row<'_>) -> rusqlite::Result<PageRow> {
    Ok(PageRow {
        page_id: row.get(0)?,
        namespace: row.get(1)?,
        title: row.get(2)?,
        redirect: row.get(3)?,
        length: row.get(4)?,
        latest: row.get(5)?,
        touched: read_timestamp(row, 6)?,
    })
}

/// Builds a page set from `titles=` or `pageids=`. `None` when neither is given.
pub fn explicit_pages(request: &RequestParams, capacity: usize) -> QueryResult<Option<PageSet>> {
    let titles = request.get_multi("titles");
    let page_ids = request.get_multi("pageids");
    if titles.is_empty() && page_ids.is_empty() {
        return Ok(None);
    }
    let count = titles.len() + page_ids.len();
    if count > capacity {
        return Err(QueryError::invalid_parameter(
            if titles.is_empty() { "pageids" } else { "titles" },
            format!("{count} values"),
            format!("at most {capacity} pages may be requested at once"),
        ));
    }

    let mut pages = PageSet::new(capacity);
    for raw in &titles {
        let title = Title::parse(raw)
            .ok_or_else(|| QueryError::invalid_parameter("titles", raw, "bad title"))?;
        pages.add(PageRef::by_title(title.namespace, &title.dbkey));
    }
    for raw in &page_ids {
        let page_id = raw
            .parse::<i64>()
            .map_err(|_| QueryError::invalid_parameter("pageids", raw, "expected integers"))?;
        pages.add(PageRef::by_id(page_id));
    }
    Ok(Some(pages))
}

/// Resolves every page in the set, in set order. With `full` the records
/// carry length, latest revision, touched and redirect.
pub fn resolve_pages(connection: &Connection, pages: &PageSet, full: bool) -> QueryResult<Vec<Value>> {
    let mut records = Vec::with_capacity(pages.len());
    for page in pages.pages() {
        let found = lookup(connection, page)?;
        let record = match found {
            Some(row) => render_found(&row, full),
            None => render_missing(page),
        };
        records.push(record);
    }
    Ok(records)
}

fn lookup(connection: &Connection, page: &PageRef) -> QueryResult<Option<PageRow>> {
    let mut builder = page_query();
    match (page.page_id, &page.title) {
        (Some(page_id), _) => {
            builder.where_eq("page_id", page_id);
        }
        (None, Some(title)) => {
            builder
                .where_eq("page_namespace", title.namespace)
                .where_eq("page_title", SqlValue::Text(title.dbkey.clone()));
        }
        (None, None) => return Ok(None),
    }
    builder.limit(1);
    Ok(builder.fetch(connection, map_page)?.into_iter().next())
}

fn render_found(row: &PageRow, full: bool) -> Value {
    let mut record = page_fields(row.page_id, row.namespace, &row.title);
    if full {
        record.insert("length".to_string(), json!(row.length));
        record.insert("lastrevid".to_string(), json!(row.latest));
        record.insert("touched".to_string(), json!(row.touched));
        if row.redirect {
            record.insert("redirect".to_string(), json!(true));
        }
    }
    Value::Object(record)
}

fn render_missing(page: &PageRef) -> Value {
    let mut record = match &page.title {
        Some(title) => page_fields(0, title.namespace, &title.dbkey),
        None => serde_json::Map::new(),
    };
    if let Some(page_id) = page.page_id {
        record.insert("pageid".to_string(), json!(page_id));
    }
    record.insert("missing".to_string(), json!(true));
    Value::Object(record)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{explicit_pages, resolve_pages};
    use crate::pageset::{PageRef, PageSet};
    use crate::testing::{request, small_wiki};

    #[test]
    fn resolves_titles_and_reports_missing() {
        let connection = small_wiki();
        let pages = explicit_pages(&request(&["titles=beta_redirect|Nowhere|talk:alpha"]), 50)
            .expect("parse")
            .expect("pages");
        let records = resolve_pages(&connection, &pages, true).expect("resolve");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["pageid"], 3);
        assert_eq!(records[0]["title"], "Beta redirect");
        assert_eq!(records[0]["redirect"], true);
        assert_eq!(records[0]["length"], 20);
        assert_eq!(records[0]["lastrevid"], 11);
        assert_eq!(records[0]["touched"], "2024-01-09T00:00:00Z");
        assert_eq!(records[1], json!({"ns": 0, "title": "Nowhere", "missing": true}));
        assert_eq!(records[2]["pageid"], 12);
        assert_eq!(records[2]["touched"], "2024-01-08T00:00:00Z");
    }

    #[test]
    fn resolves_page_ids() {
        let connection = small_wiki();
        let pages = explicit_pages(&request(&["pageids=6|99"]), 50)
            .expect("parse")
            .expect("pages");
        let records = resolve_pages(&connection, &pages, false).expect("resolve");
        assert_eq!(records[0], json!({"pageid": 6, "ns": 14, "title": "Category:Fruit"}));
        assert_eq!(records[1], json!({"pageid": 99, "missing": true}));
    }

    #[test]
    fn generator_pages_resolve_by_either_key() {
        let connection = small_wiki();
        let mut pages = PageSet::new(10);
        pages.add(PageRef::page(7, 0, "Apple"));
        pages.add(PageRef::by_title(0, "Omega"));
        let records = resolve_pages(&connection, &pages, false).expect("resolve");
        assert_eq!(records[0]["title"], "Apple");
        assert_eq!(records[1]["missing"], true);
    }

    #[test]
    fn explicit_pages_are_capped_and_validated() {
        assert!(explicit_pages(&request(&["list=allpages"]), 50).expect("none").is_none());

        let error = explicit_pages(&request(&["titles=A|B|C"]), 2).expect_err("too many");
        assert_eq!(error.code(), "badvalue");

        let error = explicit_pages(&request(&["pageids=1|two"]), 50).expect_err("bad id");
        assert_eq!(error.code(), "badvalue");
    }
}
