//! `list=alllinks`: link targets in one namespace, optionally deduplicated.

use rusqlite::Row;
use serde_json::{Value, json};

use super::{dbkey_param, page_fields};
use crate::continuation::ContinuationValue;
use crate::error::{QueryError, QueryResult};
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortField, SortKey};
use crate::select::SelectBuilder;
use crate::title::NS_MAIN;

pub struct AllLinks;

#[derive(Debug, Clone)]
pub struct AllLinksOptions {
    namespace: i64,
    from: Option<String>,
    to: Option<String>,
    prefix: Option<String>,
    unique: bool,
    with_ids: bool,
    direction: Direction,
}

#[derive(Debug, Clone)]
pub struct LinkRow {
    title: String,
    from_id: Option<i64>,
}

impl ListModule for AllLinks {
    type Options = AllLinksOptions;
    type Row = LinkRow;

    fn name(&self) -> &'static str {
        "alllinks"
    }

    fn prefix(&self) -> &'static str {
        "al"
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<AllLinksOptions> {
        let props = if params.has("prop") {
            params.choices("prop", &["ids", "title"])?
        } else {
            vec!["title"]
        };
        let unique = params.flag("unique");
        let with_ids = props.contains(&"ids");
        if unique && with_ids {
            return Err(QueryError::InvalidParameterCombination(format!(
                "{}=ids cannot be combined with {}",
                params.name("prop"),
                params.name("unique")
            )));
        }
        Ok(AllLinksOptions {
            namespace: params.int("namespace")?.unwrap_or(NS_MAIN),
            from: dbkey_param(params, "from"),
            to: dbkey_param(params, "to"),
            prefix: dbkey_param(params, "prefix"),
            unique,
            with_ids,
            direction: params.direction(Direction::Ascending)?,
        })
    }

    fn sort_key(&self, options: &AllLinksOptions) -> SortKey {
        if options.unique {
            SortKey::unique(vec![SortField::string("pl_title")])
        } else {
            SortKey::unique(vec![SortField::string("pl_title"), SortField::int("pl_from")])
        }
    }

    fn direction(&self, options: &AllLinksOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &AllLinksOptions) -> RangeBounds {
        RangeBounds {
            from: options.from.clone().map(ContinuationValue::String),
            until: options.to.clone().map(ContinuationValue::String),
        }
    }

    fn build_query(&self, options: &AllLinksOptions) -> SelectBuilder {
        let mut builder = SelectBuilder::new("pagelinks");
        if options.unique {
            builder.distinct().field("pl_title");
        } else {
            builder.fields(&["pl_title", "pl_from"]);
        }
        builder.where_eq("pl_namespace", options.namespace);
        if let Some(prefix) = &options.prefix {
            builder.where_prefix("pl_title", prefix);
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<LinkRow> {
        let from_id = if row.as_ref().column_count() > 1 {
            Some(row.get(1)?)
        } else {
            None
        };
        Ok(LinkRow {
            title: row.get(0)?,
            from_id,
        })
    }

    fn sort_values(&self, options: &AllLinksOptions, row: &LinkRow) -> Vec<ContinuationValue> {
        let mut values = vec![ContinuationValue::String(row.title.clone())];
        if !options.unique {
            values.push(ContinuationValue::Int(row.from_id.unwrap_or_default()));
        }
        values
    }

    fn render(&self, options: &AllLinksOptions, row: &LinkRow) -> Value {
        let mut record = page_fields(0, options.namespace, &row.title);
        if options.with_ids
            && let Some(from_id) = row.from_id
        {
            record.insert("fromid".to_string(), json!(from_id));
        }
        Value::Object(record)
    }

    fn page_ref(&self, options: &AllLinksOptions, row: &LinkRow) -> PageRef {
        PageRef::by_title(options.namespace, &row.title)
    }
}

#[cfg(test)]
mod tests {
    use super::AllLinks;
    use crate::executor::ContinuationOutcome;
    use crate::testing::{field, run_module, small_wiki};

    #[test]
    fn unique_targets() {
        let connection = small_wiki();
        let (records, outcome) =
            run_module(&connection, &AllLinks, &["alunique"]).expect("unique");
        assert_eq!(
            field(&records, "title"),
            ["Alpha", "Beta", "Gamma", "Missing page"]
        );
        assert_eq!(outcome.continuation, ContinuationOutcome::Complete);
    }

    #[test]
    fn every_link_resumes_inside_a_title_group() {
        let connection = small_wiki();
        let (records, outcome) = run_module(
            &connection,
            &AllLinks,
            &["allimit=3", "alprop=ids|title"],
        )
        .expect("first");
        assert_eq!(field(&records, "fromid"), ["7", "8", "1"]);
        assert_eq!(
            outcome.continuation,
            ContinuationOutcome::Resume("Beta|1".to_string())
        );

        let (records, _) = run_module(
            &connection,
            &AllLinks,
            &["allimit=3", "alprop=ids|title", "alcontinue=Beta|1"],
        )
        .expect("second");
        assert_eq!(field(&records, "fromid"), ["3", "4", "5"]);
        assert!(records.iter().all(|record| record["title"] == "Beta"));
    }

    #[test]
    fn prefix_and_range() {
        let connection = small_wiki();
        let (records, _) =
            run_module(&connection, &AllLinks, &["alunique", "alprefix=m"]).expect("prefix");
        assert_eq!(field(&records, "title"), ["Missing page"]);

        let (records, _) = run_module(
            &connection,
            &AllLinks,
            &["alunique", "alfrom=B", "alto=Gamma", "aldir=descending"],
        )
        .expect("empty window");
        assert!(records.is_empty());

        let (records, _) = run_module(
            &connection,
            &AllLinks,
            &["alunique", "alfrom=Gamma", "alto=B", "aldir=descending"],
        )
        .expect("descending window");
        assert_eq!(field(&records, "title"), ["Gamma", "Beta"]);
    }

    #[test]
    fn ids_conflict_with_unique() {
        let connection = small_wiki();
        let error = run_module(&connection, &AllLinks, &["alunique", "alprop=ids"])
            .expect_err("must fail");
        assert_eq!(error.code(), "invalidparammix");
    }
}
