//! `list=categorymembers`: pages in a category, by sort key or by the time
//! they were added.

use rusqlite::{Connection, Row};
use rusqlite::types::Value as SqlValue;
use serde_json::{Value, json};

use super::{
    int_values, page_fields, page_namespace, read_timestamp, timestamp_bounds, title_param,
};
use crate::continuation::ContinuationValue;
use crate::error::{QueryError, QueryResult};
use crate::executor::{ExecutionMode, ListModule};
use crate::pageset::PageRef;
use crate::params::ModuleParams;
use crate::range::{Direction, RangeBounds, SortField, SortKey};
use crate::select::{Comparison, SelectBuilder};
use crate::timestamp::MwTimestamp;
use crate::title::NS_CATEGORY;

pub struct CategoryMembers;

const PROPS: &[&str] = &["ids", "title", "sortkey", "sortkeyprefix", "type", "timestamp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberSort {
    SortKey,
    Timestamp,
}

#[derive(Debug, Clone)]
pub enum CategoryTarget {
    Title(String),
    PageId { page_id: i64, param: String },
}

#[derive(Debug, Clone)]
pub struct CategoryMembersOptions {
    target: CategoryTarget,
    sort: MemberSort,
    direction: Direction,
    bounds: RangeBounds,
    start_sortkey_prefix: Option<String>,
    end_sortkey_prefix: Option<String>,
    types: Vec<&'static str>,
    namespaces: Vec<i64>,
    props: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    page_id: i64,
    namespace: i64,
    title: String,
    sortkey: String,
    sortkey_prefix: String,
    member_type: String,
    timestamp: MwTimestamp,
}

impl ListModule for CategoryMembers {
    type Options = CategoryMembersOptions;
    type Row = MemberRow;

    fn name(&self) -> &'static str {
        "categorymembers"
    }

    fn prefix(&self) -> &'static str {
        "cm"
    }

    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        _mode: ExecutionMode,
    ) -> QueryResult<CategoryMembersOptions> {
        params.require_one_of(&["title", "pageid"])?;
        let target = match title_param(params, "title")? {
            Some(title) if title.namespace == NS_CATEGORY => CategoryTarget::Title(title.dbkey),
            Some(title) => {
                return Err(QueryError::invalid_parameter(
                    params.name("title"),
                    title.full_text(),
                    "not a category",
                ));
            }
            None => match params.int("pageid")? {
                Some(page_id) => CategoryTarget::PageId {
                    page_id,
                    param: params.name("pageid"),
                },
                None => {
                    return Err(QueryError::MissingParameter(params.name("pageid")));
                }
            },
        };

        let sort = match params.choice("sort", &["sortkey", "timestamp"], "sortkey")? {
            "timestamp" => MemberSort::Timestamp,
            _ => MemberSort::SortKey,
        };
        let by_time = sort == MemberSort::Timestamp;
        for param in ["start", "end"] {
            params.reject_unless(param, by_time, "with sort=timestamp")?;
        }
        for param in ["startsortkeyprefix", "endsortkeyprefix"] {
            params.reject_unless(param, !by_time, "with sort=sortkey")?;
        }

        let direction = params.direction(Direction::Ascending)?;
        let bounds = if by_time {
            timestamp_bounds(params, direction)?
        } else {
            RangeBounds::default()
        };
        let props = if params.has("prop") {
            params.choices("prop", PROPS)?
        } else {
            vec!["ids", "title"]
        };

        Ok(CategoryMembersOptions {
            target,
            sort,
            direction,
            bounds,
            start_sortkey_prefix: params.text("startsortkeyprefix"),
            end_sortkey_prefix: params.text("endsortkeyprefix"),
            types: params.choices("type", &["page", "subcat", "file"])?,
            namespaces: params.ints("namespace")?,
            props,
        })
    }

    fn check_targets(
        &self,
        connection: &Connection,
        options: &CategoryMembersOptions,
    ) -> QueryResult<()> {
        let CategoryTarget::PageId { page_id, param } = &options.target else {
            return Ok(());
        };
        match page_namespace(connection, *page_id)? {
            Some(NS_CATEGORY) => Ok(()),
            Some(_) => Err(QueryError::invalid_parameter(
                param.clone(),
                page_id.to_string(),
                "not a category",
            )),
            None => Err(QueryError::invalid_parameter(
                param.clone(),
                page_id.to_string(),
                "no page with this id",
            )),
        }
    }

    fn sort_key(&self, options: &CategoryMembersOptions) -> SortKey {
        let leading = match options.sort {
            MemberSort::SortKey => SortField::string("cl_sortkey"),
            MemberSort::Timestamp => SortField::timestamp("cl_timestamp"),
        };
        SortKey::with_tiebreak(vec![leading], SortField::int("cl_from"))
    }

    fn direction(&self, options: &CategoryMembersOptions) -> Direction {
        options.direction
    }

    fn bounds(&self, options: &CategoryMembersOptions) -> RangeBounds {
        options.bounds.clone()
    }

    fn build_query(&self, options: &CategoryMembersOptions) -> SelectBuilder {
        let mut builder = SelectBuilder::new("categorylinks");
        builder.join("page", "page_id = cl_from").fields(&[
            "cl_from",
            "page_namespace",
            "page_title",
            "cl_sortkey",
            "cl_sortkey_prefix",
            "cl_type",
            "cl_timestamp",
        ]);
        match &options.target {
            CategoryTarget::Title(dbkey) => {
                builder.where_eq("cl_to", dbkey.clone());
            }
            CategoryTarget::PageId { page_id, .. } => {
                builder.where_raw(
                    "cl_to = (SELECT page_title FROM page WHERE page_id = ? AND page_namespace = ?)",
                    vec![SqlValue::Integer(*page_id), SqlValue::Integer(NS_CATEGORY)],
                );
            }
        }
        if !options.types.is_empty() {
            let types = options
                .types
                .iter()
                .map(|member_type| SqlValue::Text((*member_type).to_string()))
                .collect();
            builder.where_in("cl_type", types);
        }
        if !options.namespaces.is_empty() {
            builder.where_in("page_namespace", int_values(&options.namespaces));
        }

        // Sort keys are uppercased titles; prefixes go through the same collation.
        // The end prefix is exclusive.
        let (onward, before) = match options.direction {
            Direction::Ascending => (Comparison::Ge, Comparison::Lt),
            Direction::Descending => (Comparison::Le, Comparison::Gt),
        };
        if let Some(prefix) = &options.start_sortkey_prefix {
            builder.where_raw(
                &format!("cl_sortkey {} upper(?)", onward.as_sql()),
                vec![SqlValue::Text(prefix.clone())],
            );
        }
        if let Some(prefix) = &options.end_sortkey_prefix {
            builder.where_raw(
                &format!("cl_sortkey {} upper(?)", before.as_sql()),
                vec![SqlValue::Text(prefix.clone())],
            );
        }
        builder
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<MemberRow> {
        Ok(MemberRow {
            page_id: row.get(0)?,
            namespace: row.get(1)?,
            title: row.get(2)?,
            sortkey: row.get(3)?,
            sortkey_prefix: row.get(4)?,
            member_type: row.get(5)?,
            timestamp: read_timestamp(row, 6)?,
        })
    }

    fn sort_values(&self, options: &CategoryMembersOptions, row: &MemberRow) -> Vec<ContinuationValue> {
        let leading = match options.sort {
            MemberSort::SortKey => ContinuationValue::String(row.sortkey.clone()),
            MemberSort::Timestamp => ContinuationValue::Timestamp(row.timestamp.clone()),
        };
        vec![leading, ContinuationValue::Int(row.page_id)]
    }

    fn render(&self, options: &CategoryMembersOptions, row: &MemberRow) -> Value {
        let base = page_fields(row.page_id, row.namespace, &row.title);
        let mut record = serde_json::Map::new();
        if options.props.contains(&"ids") {
            record.insert("pageid".to_string(), json!(row.page_id));
        }
        if options.props.contains(&"title") {
            record.insert("ns".to_string(), base["ns"].clone());
            record.insert("title".to_string(), base["title"].clone());
        }
        if options.props.contains(&"sortkey") {
            record.insert("sortkey".to_string(), json!(row.sortkey));
        }
        if options.props.contains(&"sortkeyprefix") {
            record.insert("sortkeyprefix".to_string(), json!(row.sortkey_prefix));
        }
        if options.props.contains(&"type") {
            record.insert("type".to_string(), json!(row.member_type));
        }
        if options.props.contains(&"timestamp") {
            record.insert("timestamp".to_string(), json!(row.timestamp));
        }
        Value::Object(record)
    }

    fn page_ref(&self, _options: &CategoryMembersOptions, row: &MemberRow) -> PageRef {
        PageRef::page(row.page_id, row.namespace, &row.title)
    }
}
