//! Sort order and range conditions shared by every list module.

use rusqlite::types::Value;

use crate::continuation::{ContinuationKind, ContinuationValue};
use crate::error::{QueryError, QueryResult};
use crate::select::{Comparison, Condition, SelectBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// Accepts `ascending`/`descending` (or `asc`/`desc`) and the timeline
    /// aliases `newer`/`older`.
    pub fn parse(param: &str, value: &str) -> QueryResult<Self> {
        match value.trim() {
            "ascending" | "asc" | "newer" => Ok(Self::Ascending),
            "descending" | "desc" | "older" => Ok(Self::Descending),
            other => Err(QueryError::invalid_parameter(
                param,
                other,
                "expected one of ascending, descending, newer, older",
            )),
        }
    }

    pub fn order_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    fn onward(self, inclusive: bool) -> Comparison {
        match (self, inclusive) {
            (Self::Ascending, true) => Comparison::Ge,
            (Self::Ascending, false) => Comparison::Gt,
            (Self::Descending, true) => Comparison::Le,
            (Self::Descending, false) => Comparison::Lt,
        }
    }

    fn until(self) -> Comparison {
        match self {
            Self::Ascending => Comparison::Le,
            Self::Descending => Comparison::Ge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortField {
    pub column: &'static str,
    pub kind: ContinuationKind,
}

impl SortField {
    pub const fn int(column: &'static str) -> Self {
        Self {
            column,
            kind: ContinuationKind::Int,
        }
    }

    pub const fn string(column: &'static str) -> Self {
        Self {
            column,
            kind: ContinuationKind::String,
        }
    }

    pub const fn timestamp(column: &'static str) -> Self {
        Self {
            column,
            kind: ContinuationKind::Timestamp,
        }
    }
}

/// Columns that totally order a module's rows. The tuple is unique per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    fields: Vec<SortField>,
}

impl SortKey {
    /// For columns already unique under the module's fixed filters.
    pub fn unique(fields: Vec<SortField>) -> Self {
        assert!(
            (1..=4).contains(&fields.len()),
            "sort keys have one to four columns"
        );
        Self { fields }
    }

    /// Appends `tiebreak` (a primary key column) unless it already trails the key.
    pub fn with_tiebreak(mut fields: Vec<SortField>, tiebreak: SortField) -> Self {
        if fields.last() != Some(&tiebreak) {
            fields.retain(|field| field.column != tiebreak.column);
            fields.push(tiebreak);
        }
        Self::unique(fields)
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn kinds(&self) -> Vec<ContinuationKind> {
        self.fields.iter().map(|field| field.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn leading(&self) -> &SortField {
        &self.fields[0]
    }
}

/// Static bounds on the leading sort column, in traversal terms: `from` is
/// where enumeration starts and `until` where it stops, whatever the direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeBounds {
    pub from: Option<ContinuationValue>,
    pub until: Option<ContinuationValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeBound {
    /// Resume at the named row.
    Inclusive,
    /// Resume with the row after the named one.
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct RangePolicy<'k> {
    key: &'k SortKey,
    direction: Direction,
    bounds: RangeBounds,
    resume: Option<(Vec<ContinuationValue>, ResumeBound)>,
}

impl<'k> RangePolicy<'k> {
    pub fn new(key: &'k SortKey, direction: Direction) -> Self {
        Self {
            key,
            direction,
            bounds: RangeBounds::default(),
            resume: None,
        }
    }

    pub fn with_bounds(mut self, bounds: RangeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn resume(mut self, values: Vec<ContinuationValue>, bound: ResumeBound) -> Self {
        debug_assert_eq!(values.len(), self.key.len());
        self.resume = Some((values, bound));
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn conditions(&self) -> Vec<Condition> {
        let mut out = Vec::new();
        let leading = self.key.leading().column;

        match &self.resume {
            Some((values, bound)) => out.extend(self.resume_conditions(values, *bound)),
            None => {
                if let Some(from) = &self.bounds.from {
                    out.push(compare(leading, self.direction.onward(true), from));
                }
            }
        }
        if let Some(until) = &self.bounds.until {
            out.push(compare(leading, self.direction.until(), until));
        }
        out
    }

    pub fn order_by(&self) -> Vec<String> {
        let polarity = self.direction.order_sql();
        self.key
            .fields()
            .iter()
            .map(|field| format!("{} {polarity}", field.column))
            .collect()
    }

    pub fn apply(&self, builder: &mut SelectBuilder) {
        for condition in self.conditions() {
            builder.add_condition(condition);
        }
        for order in self.order_by() {
            builder.order_by(&order);
        }
    }

    // Lexicographic tuple comparison: (a > x) OR (a = x AND b > y) OR ...
    // The final column uses the inclusive operator for ResumeBound::Inclusive.
    fn resume_conditions(&self, values: &[ContinuationValue], bound: ResumeBound) -> Vec<Condition> {
        let fields = self.key.fields();
        let last = fields.len() - 1;
        let mut out = Vec::new();

        if fields.len() > 1 {
            out.push(compare(fields[0].column, self.direction.onward(true), &values[0]));
        }

        let mut disjuncts = Vec::with_capacity(fields.len());
        let mut params: Vec<Value> = Vec::new();
        for position in 0..fields.len() {
            let mut terms = Vec::with_capacity(position + 1);
            for (field, value) in fields[..position].iter().zip(values) {
                terms.push(format!("{} = ?", field.column));
                params.push(value.to_sql_value());
            }
            let inclusive = position == last && bound == ResumeBound::Inclusive;
            terms.push(format!(
                "{} {} ?",
                fields[position].column,
                self.direction.onward(inclusive).as_sql()
            ));
            params.push(values[position].to_sql_value());
            disjuncts.push(format!("({})", terms.join(" AND ")));
        }
        out.push(Condition::new(format!("({})", disjuncts.join(" OR ")), params));
        out
    }
}

fn compare(column: &str, comparison: Comparison, value: &ContinuationValue) -> Condition {
    Condition::new(
        format!("{column} {} ?", comparison.as_sql()),
        vec![value.to_sql_value()],
    )
}
