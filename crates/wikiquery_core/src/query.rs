//! `action=query`: resolves the requested modules, runs them against one
//! request-scoped context and assembles the response.

use rusqlite::Connection;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::config::{ApiLimits, QueryConfig};
use crate::continue_manager::ContinueManager;
use crate::error::{QueryError, QueryResult};
use crate::executor::{ExecutionMode, ListRequest, PageSetSink, ResultSink};
use crate::modules::ListModuleKind;
use crate::modules::info::{explicit_pages, resolve_pages};
use crate::pageset::{GeneratorPolicy, PageSet};
use crate::params::RequestParams;
use crate::result::ApiResult;

const PAGE_CONSUMER: &str = "info";
const PROP_MODULES: &[&str] = &["info"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub limits: ApiLimits,
    pub policy: GeneratorPolicy,
    pub privileged: bool,
}

impl QueryOptions {
    pub fn from_config(config: &QueryConfig, privileged: bool) -> Self {
        Self {
            limits: config.limits(),
            policy: GeneratorPolicy {
                restart_volatile_on_cap: config.generator.restart_volatile_on_cap,
            },
            privileged,
        }
    }
}

/// The modules a request names, resolved and checked for conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub lists: Vec<ListModuleKind>,
    pub generator: Option<ListModuleKind>,
    pub info: bool,
}

impl QueryPlan {
    pub fn from_request(request: &RequestParams) -> QueryResult<Self> {
        let mut lists = Vec::new();
        for name in request.get_multi("list") {
            let kind = ListModuleKind::from_name(&name).ok_or(QueryError::UnknownModule {
                kind: "list",
                name: name.clone(),
            })?;
            if !lists.contains(&kind) {
                lists.push(kind);
            }
        }

        let generator = match request.get("generator").map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(ListModuleKind::from_name(name).ok_or_else(|| {
                QueryError::UnknownModule {
                    kind: "generator",
                    name: name.to_string(),
                }
            })?),
        };

        let mut info = false;
        for name in request.get_multi("prop") {
            if !PROP_MODULES.contains(&name.as_str()) {
                return Err(QueryError::UnknownModule { kind: "prop", name });
            }
            info = true;
        }

        let page_sources: Vec<&str> = ["titles", "pageids", "generator"]
            .into_iter()
            .filter(|name| request.get(name).is_some_and(|value| !value.trim().is_empty()))
            .collect();
        if page_sources.len() > 1 {
            return Err(QueryError::InvalidParameterCombination(format!(
                "the parameters {} can not be used together",
                page_sources.join(", ")
            )));
        }

        Ok(Self {
            lists,
            generator,
            info,
        })
    }
}

/// Everything one request owns while it runs.
struct QueryContext<'a> {
    connection: &'a Connection,
    request: &'a RequestParams,
    options: &'a QueryOptions,
    result: ApiResult,
    continuation: ContinueManager,
    pages: Option<PageSet>,
}

impl<'a> QueryContext<'a> {
    fn list_request(&self, kind: ListModuleKind, mode: ExecutionMode) -> ListRequest<'a> {
        ListRequest {
            params: self.request.for_module(kind.param_prefix(mode)),
            limits: &self.options.limits,
            privileged: self.options.privileged,
            policy: self.options.policy,
        }
    }

    /// Every module's parameters are checked before any of them runs, so an
    /// error never follows partial output.
    fn validate(&self, plan: &QueryPlan) -> QueryResult<Option<PageSet>> {
        for kind in &plan.lists {
            if !self.continuation.is_skipped(kind.name()) {
                kind.validate(
                    self.connection,
                    &self.list_request(*kind, ExecutionMode::List),
                    ExecutionMode::List,
                )?;
            }
        }
        if let Some(kind) = plan.generator
            && !self.continuation.is_generator_skipped()
        {
            kind.validate(
                self.connection,
                &self.list_request(kind, ExecutionMode::Generator),
                ExecutionMode::Generator,
            )?;
        }
        explicit_pages(self.request, self.options.limits.max_page_set)
    }

    fn run_lists(&mut self, plan: &QueryPlan) -> QueryResult<()> {
        for kind in &plan.lists {
            let name = kind.name();
            if self.continuation.is_skipped(name) {
                self.continuation.record_done(name);
                continue;
            }
            let list_request = self.list_request(*kind, ExecutionMode::List);
            let outcome = {
                let mut sink = ResultSink::new(&mut self.result, name);
                kind.run(self.connection, &list_request, &mut sink)?
            };
            for warning in &outcome.warnings {
                self.result.add_warning(name, warning.clone());
            }
            self.continuation.record_list(&outcome);
        }
        Ok(())
    }

    fn run_generator(&mut self, kind: ListModuleKind) -> QueryResult<()> {
        if self.continuation.is_generator_skipped() {
            return Ok(());
        }
        let list_request = self.list_request(kind, ExecutionMode::Generator);
        let mut pages = PageSet::new(self.options.limits.max_page_set);
        let outcome = {
            let mut sink = PageSetSink::new(&mut pages);
            kind.run(self.connection, &list_request, &mut sink)?
        };
        for warning in &outcome.warnings {
            self.result.add_warning(kind.name(), warning.clone());
        }
        self.continuation.record_generator(&outcome);
        self.pages = Some(pages);
        Ok(())
    }

    fn resolve_pages(&mut self, plan: &QueryPlan) -> QueryResult<Option<Vec<Value>>> {
        if plan.generator.is_none() && self.pages.is_none() {
            return Ok(None);
        }
        self.continuation.record_page_consumer(PAGE_CONSUMER);
        if self.continuation.is_skipped(PAGE_CONSUMER) {
            return Ok(None);
        }
        match &self.pages {
            Some(pages) => resolve_pages(self.connection, pages, plan.info).map(Some),
            None => Ok(None),
        }
    }
}

/// Runs one batch of a query request and returns the response body.
pub fn execute_query(
    connection: &Connection,
    request: &RequestParams,
    options: &QueryOptions,
) -> QueryResult<Value> {
    let plan = QueryPlan::from_request(request)?;
    let mut context = QueryContext {
        connection,
        request,
        options,
        result: ApiResult::new(options.limits.max_result_size),
        continuation: ContinueManager::from_request(request)?,
        pages: None,
    };
    context.pages = context.validate(&plan)?;

    context.run_lists(&plan)?;
    if let Some(kind) = plan.generator {
        context.run_generator(kind)?;
    }
    let pages = context.resolve_pages(&plan)?;

    let QueryContext {
        result,
        continuation,
        ..
    } = context;
    let output = continuation.finish();
    if let Some(restart) = &output.restart {
        info!(%restart, "query answered with a restart hint");
    }

    let mut response = Map::new();
    if output.batch_complete {
        response.insert("batchcomplete".to_string(), json!(true));
    }
    if let Some(values) = output.continue_values {
        response.insert("continue".to_string(), Value::Object(values));
    }
    if let Some(restart) = output.restart {
        response.insert("restart".to_string(), restart);
    }
    let (mut query, warnings) = result.into_parts();
    if let Some(warnings) = warnings {
        response.insert("warnings".to_string(), warnings);
    }
    if let Some(pages) = pages {
        query.insert("pages".to_string(), Value::Array(pages));
    }
    if !query.is_empty() {
        response.insert("query".to_string(), Value::Object(query));
    }
    debug!(
        lists = plan.lists.len(),
        generator = plan.generator.map(ListModuleKind::name),
        continues = response.contains_key("continue"),
        "query batch finished"
    );
    Ok(Value::Object(response))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{QueryOptions, QueryPlan, execute_query};
    use crate::config::ApiLimits;
    use crate::continue_manager::next_request;
    use crate::modules::ListModuleKind;
    use crate::testing::{field, request, small_wiki};

    fn titles(response: &Value, module: &str) -> Vec<String> {
        response["query"][module]
            .as_array()
            .map(|records| field(records, "title"))
            .unwrap_or_default()
    }

    #[test]
    fn plan_resolves_modules() {
        let plan = QueryPlan::from_request(&request(&[
            "list=allpages|backlinks|allpages",
            "generator=categorymembers",
            "prop=info",
        ]))
        .expect("plan");
        assert_eq!(
            plan.lists,
            vec![ListModuleKind::AllPages, ListModuleKind::Backlinks]
        );
        assert_eq!(plan.generator, Some(ListModuleKind::CategoryMembers));
        assert!(plan.info);
    }

    #[test]
    fn unknown_modules_are_named() {
        for (pairs, kind) in [
            (["list=watchlist"], "list"),
            (["generator=bogus"], "generator"),
            (["prop=revisions"], "prop"),
        ] {
            let error = QueryPlan::from_request(&request(&pairs)).expect_err("must fail");
            assert_eq!(error.code(), "unknown_module");
            assert!(error.to_string().contains(kind));
        }
    }

    #[test]
    fn page_sources_are_exclusive() {
        let connection = small_wiki();
        let error = execute_query(
            &connection,
            &request(&["titles=Alpha", "generator=allpages"]),
            &QueryOptions::default(),
        )
        .expect_err("must fail");
        assert_eq!(error.code(), "invalidparammix");

        let response = execute_query(
            &connection,
            &request(&["titles=Alpha", "generator=", "prop=info"]),
            &QueryOptions::default(),
        )
        .expect("an empty generator is no page source");
        let pages = response["query"]["pages"].as_array().expect("pages");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0]["title"], "Alpha");
    }

    #[test]
    fn single_list_batch_carries_a_continue_object() {
        let connection = small_wiki();
        let response = execute_query(
            &connection,
            &request(&["list=allpages", "aplimit=5"]),
            &QueryOptions::default(),
        )
        .expect("query");
        assert_eq!(
            titles(&response, "allpages"),
            ["Alpha", "Apple", "Banana", "Beta", "Beta redirect"]
        );
        assert_eq!(
            response["continue"],
            json!({"apcontinue": "Beta_redirect", "continue": "-||"})
        );
        assert!(response.get("batchcomplete").is_none());
    }

    #[test]
    fn walking_with_the_continue_object_visits_every_page_once() {
        let connection = small_wiki();
        let original = request(&["list=allpages", "aplimit=2", "continue="]);
        let mut next = Some(original.clone());
        let mut seen = Vec::new();
        let mut batches = 0;
        while let Some(params) = next {
            let response =
                execute_query(&connection, &params, &QueryOptions::default()).expect("batch");
            seen.extend(titles(&response, "allpages"));
            batches += 1;
            next = next_request(&original, &response);
        }
        assert_eq!(batches, 4);
        assert_eq!(
            seen,
            ["Alpha", "Apple", "Banana", "Beta", "Beta redirect", "Delta", "Gamma"]
        );
    }

    #[test]
    fn finished_list_modules_are_skipped_on_continuation() {
        let connection = small_wiki();
        let original = request(&["list=allpages|backlinks", "aplimit=3", "bltitle=Beta"]);
        let first = execute_query(&connection, &original, &QueryOptions::default()).expect("first");
        assert_eq!(titles(&first, "backlinks").len(), 5);
        assert_eq!(
            first["continue"],
            json!({"apcontinue": "Banana", "continue": "-||backlinks"})
        );

        let second_request = next_request(&original, &first).expect("continues");
        let second = execute_query(&connection, &second_request, &QueryOptions::default())
            .expect("second");
        assert!(second["query"].get("backlinks").is_none());
        assert_eq!(
            titles(&second, "allpages"),
            ["Beta", "Beta redirect", "Delta"]
        );
        assert_eq!(second["continue"]["continue"], "-||backlinks");

        let third_request = next_request(&original, &second).expect("continues");
        let third =
            execute_query(&connection, &third_request, &QueryOptions::default()).expect("third");
        assert_eq!(titles(&third, "allpages"), ["Gamma"]);
        assert!(third.get("continue").is_none());
        assert_eq!(third["batchcomplete"], true);
    }

    #[test]
    fn generator_feeds_info_in_batches() {
        let connection = small_wiki();
        let original = request(&[
            "generator=allpages",
            "gapnamespace=14",
            "gaplimit=1",
            "prop=info",
        ]);
        let first = execute_query(&connection, &original, &QueryOptions::default()).expect("first");
        assert_eq!(first["batchcomplete"], true);
        assert_eq!(
            first["continue"],
            json!({"gapcontinue": "Citrus", "continue": "gapcontinue||"})
        );
        let pages = first["query"]["pages"].as_array().expect("pages");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0]["title"], "Category:Citrus");
        assert_eq!(pages[0]["lastrevid"], 13);

        let second_request = next_request(&original, &first).expect("continues");
        let second = execute_query(&connection, &second_request, &QueryOptions::default())
            .expect("second");
        assert_eq!(titles(&second, "pages"), ["Category:Fruit"]);
        assert!(second.get("continue").is_none());
    }

    #[test]
    fn exhausted_generator_is_skipped_while_lists_continue() {
        let connection = small_wiki();
        let original = request(&[
            "list=allpages",
            "aplimit=2",
            "generator=allpages",
            "gapnamespace=14",
        ]);
        let first = execute_query(&connection, &original, &QueryOptions::default()).expect("first");
        assert_eq!(titles(&first, "pages"), ["Category:Citrus", "Category:Fruit"]);
        assert_eq!(
            first["continue"],
            json!({"apcontinue": "Apple", "continue": "-||info"})
        );

        let second_request = next_request(&original, &first).expect("continues");
        let second = execute_query(&connection, &second_request, &QueryOptions::default())
            .expect("second");
        assert!(second["query"].get("pages").is_none());
        assert_eq!(titles(&second, "allpages"), ["Banana", "Beta"]);
    }

    #[test]
    fn explicit_titles_resolve_without_a_generator() {
        let connection = small_wiki();
        let response = execute_query(
            &connection,
            &request(&["titles=Alpha|Nowhere", "prop=info"]),
            &QueryOptions::default(),
        )
        .expect("query");
        let pages = response["query"]["pages"].as_array().expect("pages");
        assert_eq!(pages[0]["length"], 100);
        assert_eq!(pages[1]["missing"], true);
        assert_eq!(response["batchcomplete"], true);
    }

    #[test]
    fn volatile_generator_filling_the_page_set_asks_for_a_restart() {
        let connection = small_wiki();
        let options = QueryOptions {
            limits: ApiLimits {
                max_page_set: 3,
                ..ApiLimits::default()
            },
            ..QueryOptions::default()
        };
        let response = execute_query(
            &connection,
            &request(&["generator=recentchanges", "grclimit=5"]),
            &options,
        )
        .expect("query");
        assert_eq!(response["restart"]["module"], "recentchanges");
        assert!(response.get("continue").is_none());
        assert_eq!(
            titles(&response, "pages"),
            ["Category:Fruit", "Beta redirect", "Talk:Alpha"]
        );

        let response = execute_query(
            &connection,
            &request(&["generator=allpages", "gaplimit=10"]),
            &options,
        )
        .expect("query");
        assert!(response.get("restart").is_none());
        assert_eq!(response["continue"]["gapcontinue"], "Banana");
    }

    #[test]
    fn parameter_errors_surface_before_any_module_runs() {
        let connection = small_wiki();
        let error = execute_query(
            &connection,
            &request(&["list=allpages|backlinks"]),
            &QueryOptions::default(),
        )
        .expect_err("backlinks needs a target");
        assert_eq!(error.code(), "missingparam");

        let error = execute_query(
            &connection,
            &request(&["list=allpages", "continue=nonsense"]),
            &QueryOptions::default(),
        )
        .expect_err("bad continue");
        assert_eq!(error.code(), "badvalue");
    }

    #[test]
    fn clamped_limits_produce_warnings() {
        let connection = small_wiki();
        let response = execute_query(
            &connection,
            &request(&["list=allpages", "aplimit=600"]),
            &QueryOptions::default(),
        )
        .expect("query");
        let warning = response["warnings"]["allpages"][0].as_str().expect("warning");
        assert!(warning.contains("aplimit"));

        let privileged = QueryOptions {
            privileged: true,
            ..QueryOptions::default()
        };
        let response = execute_query(
            &connection,
            &request(&["list=allpages", "aplimit=600"]),
            &privileged,
        )
        .expect("query");
        assert!(response.get("warnings").is_none());
    }
}
