//! `list=allpages`: pages of one namespace in title order.

use rusqlite::Row;
use serde_json::Value;

use super::{dbkey_param, page_fields};
use crate::continuation::ContinuationValue;
use crate::error::QueryResult;
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortField, SortKey};
use crate::select::{Comparison, SelectBuilder};
use crate::title::NS_MAIN;

pub struct AllPages;

#[derive(Debug, Clone)]
pub struct AllPagesOptions {
    namespace: i64,
    from: Option<String>,
    to: Option<String>,
    prefix: Option<String>,
    filter_redirects: &'static str,
    min_size: Option<i64>,
    max_size: Option<i64>,
    direction: Direction,
}

#[derive(Debug, Clone)]
pub struct PageRow {
    page_id: i64,
    namespace: i64,
    title: String,
}

impl ListModule for AllPages {
    type Options = AllPagesOptions;
    type Row = PageRow;

    fn name(&self) -> &'static str {
        "allpages"
    }

    fn prefix(&self) -> &'static str {
        "ap"
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<AllPagesOptions> {
        Ok(AllPagesOptions {
            namespace: params.int("namespace")?.unwrap_or(NS_MAIN),
            from: dbkey_param(params, "from"),
            to: dbkey_param(params, "to"),
            prefix: dbkey_param(params, "prefix"),
            filter_redirects: params.choice(
                "filterredir",
                &["all", "redirects", "nonredirects"],
                "all",
            )?,
            min_size: params.int("minsize")?,
            max_size: params.int("maxsize")?,
            direction: params.direction(Direction::Ascending)?,
        })
    }

    // Titles are unique within the fixed namespace.
    fn sort_key(&self, _options: &AllPagesOptions) -> SortKey {
        SortKey::unique(vec![SortField::string("page_title")])
    }

    fn direction(&self, options: &AllPagesOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &AllPagesOptions) -> RangeBounds {
        RangeBounds {
            from: options.from.clone().map(ContinuationValue::String),
            until: options.to.clone().map(ContinuationValue::String),
        }
    }

    fn build_query(&self, options: &AllPagesOptions) -> SelectBuilder {
        let mut builder = SelectBuilder::new("page");
        builder
            .fields(&["page_id", "page_namespace", "page_title"])
            .where_eq("page_namespace", options.namespace);
        if let Some(prefix) = &options.prefix {
            builder.where_prefix("page_title", prefix);
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
        if let Some(min_size) = options.min_size {
            builder.where_cmp("page_len", Comparison::Ge, min_size);
        }
        if let Some(max_size) = options.max_size {
            builder.where_cmp("page_len", Comparison::Le, max_size);
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<PageRow> {
        Ok(PageRow {
            page_id: row.get(0)?,
            namespace: row.get(1)?,
            title: row.get(2)?,
        })
    }

    fn sort_values(&self, _options: &AllPagesOptions, row: &PageRow) -> Vec<ContinuationValue> {
        vec![ContinuationValue::String(row.title.clone())]
    }

    fn render(&self, _options: &AllPagesOptions, row: &PageRow) -> Value {
        Value::Object(page_fields(row.page_id, row.namespace, &row.title))
    }

    fn page_ref(&self, _options: &AllPagesOptions, row: &PageRow) -> PageRef {
        PageRef::page(row.page_id, row.namespace, &row.title)
    }
}

#[cfg(test)]
mod tests {
    use super::AllPages;
    use crate::executor::ContinuationOutcome;
    use crate::testing::{field, run_module, small_wiki};

    #[test]
    fn pages_in_title_order_with_resume() {
        let connection = small_wiki();
        let (records, outcome) =
            run_module(&connection, &AllPages, &["aplimit=3"]).expect("first batch");
        assert_eq!(field(&records, "title"), ["Alpha", "Apple", "Banana"]);
        assert_eq!(
            outcome.continuation,
            ContinuationOutcome::Resume("Banana".to_string())
        );

        let (records, outcome) =
            run_module(&connection, &AllPages, &["aplimit=3", "apcontinue=Banana"])
                .expect("second batch");
        assert_eq!(
            field(&records, "title"),
            ["Beta", "Beta redirect", "Delta"]
        );
        assert_eq!(
            outcome.continuation,
            ContinuationOutcome::Resume("Delta".to_string())
        );

        let (records, outcome) =
            run_module(&connection, &AllPages, &["aplimit=3", "apcontinue=Delta"])
                .expect("last batch");
        assert_eq!(field(&records, "title"), ["Gamma"]);
        assert_eq!(outcome.continuation, ContinuationOutcome::Complete);
    }

    #[test]
    fn prefix_and_redirect_filters() {
        let connection = small_wiki();
        let (records, _) = run_module(&connection, &AllPages, &["apprefix=b"]).expect("prefix");
        assert_eq!(field(&records, "title"), ["Banana", "Beta", "Beta redirect"]);

        let (records, _) = run_module(
            &connection,
            &AllPages,
            &["apprefix=Beta", "apfilterredir=nonredirects"],
        )
        .expect("nonredirects");
        assert_eq!(field(&records, "title"), ["Beta"]);
    }

    #[test]
    fn size_filters_and_range() {
        let connection = small_wiki();
        let (records, _) = run_module(&connection, &AllPages, &["apminsize=300"]).expect("minsize");
        assert_eq!(field(&records, "title"), ["Apple", "Banana", "Gamma"]);

        let (records, _) =
            run_module(&connection, &AllPages, &["apfrom=Apple", "apto=Beta"]).expect("range");
        assert_eq!(field(&records, "title"), ["Apple", "Banana", "Beta"]);
    }

    #[test]
    fn descending_from_walks_backwards() {
        let connection = small_wiki();
        let (records, _) = run_module(
            &connection,
            &AllPages,
            &["apdir=descending", "apfrom=Beta"],
        )
        .expect("descending");
        assert_eq!(field(&records, "title"), ["Beta", "Banana", "Apple", "Alpha"]);
    }

    #[test]
    fn other_namespaces_render_prefixed_titles() {
        let connection = small_wiki();
        let (records, _) = run_module(&connection, &AllPages, &["apnamespace=14"]).expect("ns");
        assert_eq!(field(&records, "title"), ["Category:Citrus", "Category:Fruit"]);
        assert_eq!(records[0]["pageid"], 9);
    }

    #[test]
    fn rejects_unknown_filter_values() {
        let connection = small_wiki();
        let error = run_module(&connection, &AllPages, &["apfilterredir=some"])
            .expect_err("must fail");
        assert_eq!(error.code(), "badvalue");
    }
}
