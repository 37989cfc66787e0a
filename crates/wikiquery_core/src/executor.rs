//! Generic list execution: one implementation of the fetch/truncate/continue
//! protocol, parameterized by a [`ListModule`].

use rusqlite::{Connection, Row};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ApiLimits;
use crate::continuation::{ContinuationValue, decode_continuation, encode_continuation};
use crate::error::{QueryError, QueryResult};
use crate::pageset::{GeneratorPolicy, PageRef, PageSet};
use crate::params::{ModuleParams, ResolvedLimit};
use crate::range::{Direction, RangeBounds, RangePolicy, ResumeBound, SortKey};
use crate::result::ApiResult;
use crate::select::SelectBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    List,
    Generator,
}

/// Entity-specific half of a list module. The executor owns everything else.
pub trait ListModule {
    type Options;
    type Row;

    fn name(&self) -> &'static str;

    fn prefix(&self) -> &'static str;

    /// Collections that take insertions at the start of their traversal.
    fn is_volatile(&self) -> bool {
        false
    }

    /// Validates parameters. Runs before any query is built.
    fn parse_options(
        &self,
        params: &ModuleParams<'_>,
        mode: ExecutionMode,
    ) -> QueryResult<Self::Options>;

    /// Parameter checks that need the store, such as a page id naming the
    /// right kind of page. Runs before any rows are fetched.
    fn check_targets(&self, _connection: &Connection, _options: &Self::Options) -> QueryResult<()> {
        Ok(())
    }

    fn sort_key(&self, options: &Self::Options) -> SortKey;

    fn direction(&self, options: &Self::Options) -> Direction;

    fn bounds(&self, _options: &Self::Options) -> RangeBounds {
        RangeBounds::default()
    }

    /// Tables, joins, fields and filters; ordering and limits are added by the executor.
    fn build_query(&self, options: &Self::Options) -> SelectBuilder;

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<Self::Row>;

    /// Values of the sort key columns, in key order.
    fn sort_values(&self, options: &Self::Options, row: &Self::Row) -> Vec<ContinuationValue>;

    fn render(&self, options: &Self::Options, row: &Self::Row) -> Value;

    fn page_ref(&self, options: &Self::Options, row: &Self::Row) -> PageRef;
}

#[derive(Debug, Clone)]
pub enum ListItem {
    Record(Value),
    Page(PageRef),
}

pub trait ListSink {
    fn mode(&self) -> ExecutionMode;

    /// Returns false when the item does not fit; the sink is left unchanged.
    fn offer(&mut self, item: ListItem) -> bool;

    /// True when nothing from any module has been accepted yet.
    fn is_empty(&self) -> bool;
}

pub struct ResultSink<'r> {
    result: &'r mut ApiResult,
    module: &'static str,
}

impl<'r> ResultSink<'r> {
    pub fn new(result: &'r mut ApiResult, module: &'static str) -> Self {
        result.touch(module);
        Self { result, module }
    }
}

impl ListSink for ResultSink<'_> {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::List
    }

    fn offer(&mut self, item: ListItem) -> bool {
        match item {
            ListItem::Record(record) => self.result.try_add(self.module, record),
            ListItem::Page(_) => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.result.size() == 0
    }
}

pub struct PageSetSink<'p> {
    pages: &'p mut PageSet,
}

impl<'p> PageSetSink<'p> {
    pub fn new(pages: &'p mut PageSet) -> Self {
        Self { pages }
    }
}

impl ListSink for PageSetSink<'_> {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Generator
    }

    fn offer(&mut self, item: ListItem) -> bool {
        match item {
            ListItem::Page(page) => self.pages.add(page),
            ListItem::Record(_) => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationOutcome {
    /// The traversal is exhausted.
    Complete,
    /// More rows remain after the last emitted one.
    Resume(String),
    /// Nothing fit in this batch; rerun with the same parameters.
    Deferred,
    /// Start the traversal again instead of resuming.
    RestartHint { reason: String },
}

#[derive(Debug, Clone)]
pub struct ListRequest<'a> {
    pub params: ModuleParams<'a>,
    pub limits: &'a ApiLimits,
    pub privileged: bool,
    pub policy: GeneratorPolicy,
}

#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub module: &'static str,
    pub continue_param: String,
    pub incoming: Option<String>,
    pub limit: usize,
    pub emitted: usize,
    pub warnings: Vec<String>,
    pub continuation: ContinuationOutcome,
}

enum Stop {
    Exhausted,
    Limit,
    SinkFull,
}

struct Prepared<O> {
    options: O,
    limit: ResolvedLimit,
    key: SortKey,
    continue_param: String,
    incoming: Option<String>,
    resume: Option<Vec<ContinuationValue>>,
}

fn prepare<M: ListModule>(
    module: &M,
    request: &ListRequest<'_>,
    mode: ExecutionMode,
) -> QueryResult<Prepared<M::Options>> {
    let params = &request.params;
    let options = module.parse_options(params, mode)?;
    let limit = params.limit(request.limits, request.privileged)?;
    let key = module.sort_key(&options);

    let continue_param = params.name("continue");
    let incoming = params.get("continue").map(str::to_string);
    let resume = match &incoming {
        Some(token) => Some(decode_continuation(token, &key.kinds()).map_err(|source| {
            QueryError::BadContinuation {
                param: continue_param.clone(),
                source,
            }
        })?),
        None => None,
    };

    Ok(Prepared {
        options,
        limit,
        key,
        continue_param,
        incoming,
        resume,
    })
}

/// Checks options, limit, continuation and targets without fetching rows.
pub fn validate_list<M: ListModule>(
    connection: &Connection,
    module: &M,
    request: &ListRequest<'_>,
    mode: ExecutionMode,
) -> QueryResult<()> {
    let prepared = prepare(module, request, mode)?;
    module.check_targets(connection, &prepared.options)
}

pub fn run_list<M: ListModule>(
    connection: &Connection,
    module: &M,
    request: &ListRequest<'_>,
    sink: &mut dyn ListSink,
) -> QueryResult<ListOutcome> {
    let mode = sink.mode();
    let params = &request.params;
    let Prepared {
        options,
        limit,
        key,
        continue_param,
        incoming,
        resume,
    } = prepare(module, request, mode)?;
    module.check_targets(connection, &options)?;

    let mut policy =
        RangePolicy::new(&key, module.direction(&options)).with_bounds(module.bounds(&options));
    if let Some(values) = resume {
        policy = policy.resume(values, ResumeBound::Exclusive);
    }
    let mut builder = module.build_query(&options);
    policy.apply(&mut builder);
    builder.limit(limit.limit.saturating_add(1));

    let rows = builder.fetch(connection, |row| module.map_row(row))?;

    let sink_was_empty = sink.is_empty();
    let mut emitted = 0usize;
    let mut last_emitted: Option<Vec<ContinuationValue>> = None;
    let mut stop = Stop::Exhausted;
    for row in &rows {
        if emitted == limit.limit {
            stop = Stop::Limit;
            break;
        }
        let item = match mode {
            ExecutionMode::List => ListItem::Record(module.render(&options, row)),
            ExecutionMode::Generator => ListItem::Page(module.page_ref(&options, row)),
        };
        if !sink.offer(item) {
            stop = Stop::SinkFull;
            break;
        }
        emitted += 1;
        last_emitted = Some(module.sort_values(&options, row));
    }

    let continuation = match (stop, last_emitted) {
        (Stop::Exhausted, _) => ContinuationOutcome::Complete,
        (Stop::SinkFull, _)
            if mode == ExecutionMode::Generator
                && request
                    .policy
                    .should_restart(module.is_volatile(), incoming.is_some(), true) =>
        {
            info!(
                module = module.name(),
                emitted,
                "page set filled on the first batch of a volatile generator; asking caller to restart"
            );
            ContinuationOutcome::RestartHint {
                reason: format!(
                    "{} filled the page set on its first batch; restart with a smaller {}",
                    module.name(),
                    params.name("limit")
                ),
            }
        }
        (_, Some(values)) => ContinuationOutcome::Resume(encode_continuation(&values)),
        (_, None) if sink_was_empty => {
            return Err(QueryError::ResultTooLarge {
                module: module.name().to_string(),
            });
        }
        (_, None) => ContinuationOutcome::Deferred,
    };

    debug!(
        module = module.name(),
        limit = limit.limit,
        fetched = rows.len(),
        emitted,
        outcome = ?continuation,
        "list batch finished"
    );

    Ok(ListOutcome {
        module: module.name(),
        continue_param,
        incoming,
        limit: limit.limit,
        emitted,
        warnings: limit.warning.into_iter().collect(),
        continuation,
    })
}
