//! Request parameters and the prefixed per-module view over them.

use std::collections::BTreeMap;

use crate::config::ApiLimits;
use crate::error::{QueryError, QueryResult};
use crate::range::Direction;
use crate::timestamp::MwTimestamp;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    values: BTreeMap<String, String>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` arguments; a bare `key` is a boolean flag.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) => params.set(key.trim(), value),
                None => params.set(pair.trim(), ""),
            }
        }
        params
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn get_multi(&self, name: &str) -> Vec<String> {
        self.get(name).map(split_multi).unwrap_or_default()
    }

    pub fn for_module(&self, prefix: impl Into<String>) -> ModuleParams<'_> {
        ModuleParams {
            params: self,
            prefix: prefix.into(),
        }
    }
}

fn split_multi(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Result of clamping a requested limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimit {
    pub limit: usize,
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModuleParams<'a> {
    params: &'a RequestParams,
    prefix: String,
}

impl<'a> ModuleParams<'a> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name(&self, param: &str) -> String {
        format!("{}{param}", self.prefix)
    }

    pub fn get(&self, param: &str) -> Option<&'a str> {
        self.params.get(&self.name(param))
    }

    pub fn has(&self, param: &str) -> bool {
        self.params.contains(&self.name(param))
    }

    /// Flags are true when present, whatever their value.
    pub fn flag(&self, param: &str) -> bool {
        self.has(param)
    }

    pub fn text(&self, param: &str) -> Option<String> {
        self.get(param)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn multi(&self, param: &str) -> Vec<String> {
        self.params.get_multi(&self.name(param))
    }

    pub fn int(&self, param: &str) -> QueryResult<Option<i64>> {
        match self.get(param) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| {
                QueryError::invalid_parameter(self.name(param), raw, "expected an integer")
            }),
        }
    }

    pub fn ints(&self, param: &str) -> QueryResult<Vec<i64>> {
        self.multi(param)
            .into_iter()
            .map(|value| {
                value.parse::<i64>().map_err(|_| {
                    QueryError::invalid_parameter(self.name(param), &value, "expected integers")
                })
            })
            .collect()
    }

    pub fn timestamp(&self, param: &str) -> QueryResult<Option<MwTimestamp>> {
        match self.get(param) {
            None => Ok(None),
            Some(raw) => MwTimestamp::parse(raw).map(Some).ok_or_else(|| {
                QueryError::invalid_parameter(
                    self.name(param),
                    raw,
                    "expected YYYYMMDDHHMMSS or YYYY-MM-DDTHH:MM:SSZ",
                )
            }),
        }
    }

    /// Single value from a closed set.
    pub fn choice(&self, param: &str, allowed: &[&'static str], default: &'static str) -> QueryResult<&'static str> {
        let Some(raw) = self.get(param) else {
            return Ok(default);
        };
        allowed
            .iter()
            .find(|candidate| **candidate == raw.trim())
            .copied()
            .ok_or_else(|| {
                QueryError::invalid_parameter(
                    self.name(param),
                    raw,
                    format!("expected one of {}", allowed.join(", ")),
                )
            })
    }

    /// Multi value from a closed set; empty when absent.
    pub fn choices(&self, param: &str, allowed: &[&'static str]) -> QueryResult<Vec<&'static str>> {
        let mut out = Vec::new();
        for value in self.multi(param) {
            let found = allowed
                .iter()
                .find(|candidate| **candidate == value)
                .copied()
                .ok_or_else(|| {
                    QueryError::invalid_parameter(
                        self.name(param),
                        &value,
                        format!("expected values from {}", allowed.join(", ")),
                    )
                })?;
            if !out.contains(&found) {
                out.push(found);
            }
        }
        Ok(out)
    }

    pub fn direction(&self, default: Direction) -> QueryResult<Direction> {
        match self.get("dir") {
            None => Ok(default),
            Some(raw) => Direction::parse(&self.name("dir"), raw),
        }
    }

    pub fn require_max_one_of(&self, params: &[&str]) -> QueryResult<()> {
        let present: Vec<String> = params
            .iter()
            .filter(|param| self.has(param))
            .map(|param| self.name(param))
            .collect();
        if present.len() > 1 {
            return Err(QueryError::InvalidParameterCombination(format!(
                "the parameters {} can not be used together",
                present.join(", ")
            )));
        }
        Ok(())
    }

    pub fn require_one_of(&self, params: &[&str]) -> QueryResult<()> {
        self.require_max_one_of(params)?;
        if !params.iter().any(|param| self.has(param)) {
            let names: Vec<String> = params.iter().map(|param| self.name(param)).collect();
            return Err(QueryError::MissingParameter(format!(
                "one of {}",
                names.join(", ")
            )));
        }
        Ok(())
    }

    /// Rejects `param` unless `allowed` holds.
    pub fn reject_unless(&self, param: &str, allowed: bool, requirement: &str) -> QueryResult<()> {
        if self.has(param) && !allowed {
            return Err(QueryError::InvalidParameterCombination(format!(
                "{} may only be used {requirement}",
                self.name(param)
            )));
        }
        Ok(())
    }

    /// `limit` as a count or `max`, clamped to the caller's maximum.
    pub fn limit(&self, limits: &ApiLimits, privileged: bool) -> QueryResult<ResolvedLimit> {
        let max = limits.max_for(privileged);
        let name = self.name("limit");
        let Some(raw) = self.get("limit") else {
            return Ok(ResolvedLimit {
                limit: limits.default_limit.min(max),
                warning: None,
            });
        };
        let raw = raw.trim();
        if raw == "max" {
            return Ok(ResolvedLimit {
                limit: max,
                warning: None,
            });
        }
        let requested = raw.parse::<i64>().map_err(|_| {
            QueryError::invalid_parameter(&name, raw, "expected an integer or \"max\"")
        })?;
        if requested < 1 {
            return Ok(ResolvedLimit {
                limit: 1,
                warning: Some(format!("{name} may not be less than 1 (set to {requested}); using 1")),
            });
        }
        let requested = usize::try_from(requested).unwrap_or(usize::MAX);
        if requested > max {
            return Ok(ResolvedLimit {
                limit: max,
                warning: Some(format!(
                    "{name} may not be over {max} (set to {requested}) for this caller; using {max}"
                )),
            });
        }
        Ok(ResolvedLimit {
            limit: requested,
            warning: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::RequestParams;
    use crate::config::ApiLimits;
    use crate::range::Direction;

    fn params(pairs: &[&str]) -> RequestParams {
        RequestParams::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn module_view_reads_prefixed_names() {
        let request = params(&["list=allpages", "apfrom=B", "apnamespace=0|14", "apfilter"]);
        let module = request.for_module("ap");
        assert_eq!(module.get("from"), Some("B"));
        assert_eq!(module.ints("namespace").expect("ints"), vec![0, 14]);
        assert!(module.flag("filter"));
        assert!(!module.flag("other"));
        assert_eq!(module.name("continue"), "apcontinue");
    }

    #[test]
    fn limit_defaults_clamps_and_accepts_max() {
        let limits = ApiLimits::default();

        let absent = params(&[]).for_module("ap").limit(&limits, false).expect("limit");
        assert_eq!(absent.limit, 10);

        let over = params(&["aplimit=900"]);
        let resolved = over.for_module("ap").limit(&limits, false).expect("limit");
        assert_eq!(resolved.limit, 500);
        assert!(resolved.warning.expect("warning").contains("aplimit"));

        let privileged = over.for_module("ap").limit(&limits, true).expect("limit");
        assert_eq!(privileged.limit, 900);
        assert!(privileged.warning.is_none());

        let max = params(&["aplimit=max"]).for_module("ap").limit(&limits, true).expect("limit");
        assert_eq!(max.limit, 5000);

        let zero = params(&["aplimit=0"]).for_module("ap").limit(&limits, false).expect("limit");
        assert_eq!(zero.limit, 1);
        assert!(zero.warning.is_some());

        let error = params(&["aplimit=lots"])
            .for_module("ap")
            .limit(&limits, false)
            .expect_err("must fail");
        assert_eq!(error.code(), "badvalue");
    }

    #[test]
    fn exclusive_parameters_are_rejected() {
        let request = params(&["arvuser=A", "arvexcludeuser=B"]);
        let error = request
            .for_module("arv")
            .require_max_one_of(&["user", "excludeuser"])
            .expect_err("must fail");
        assert_eq!(error.code(), "invalidparammix");
        assert!(error.to_string().contains("arvuser, arvexcludeuser"));
    }

    #[test]
    fn require_one_of_reports_missing() {
        let request = params(&[]);
        let error = request
            .for_module("cm")
            .require_one_of(&["title", "pageid"])
            .expect_err("must fail");
        assert_eq!(error.code(), "missingparam");
    }

    #[test]
    fn choices_and_direction_validate_values() {
        let request = params(&["cmtype=page|subcat|page", "cmdir=newer", "cmsort=bogus"]);
        let module = request.for_module("cm");
        assert_eq!(
            module
                .choices("type", &["page", "subcat", "file"])
                .expect("choices"),
            vec!["page", "subcat"]
        );
        assert_eq!(
            module.direction(Direction::Descending).expect("dir"),
            Direction::Ascending
        );
        assert!(module.choice("sort", &["sortkey", "timestamp"], "sortkey").is_err());
    }
}
