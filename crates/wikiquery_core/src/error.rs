use serde_json::{Value, json};

use crate::continuation::BadContinuation;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid value for {param}: {source}")]
    BadContinuation {
        param: String,
        #[source]
        source: BadContinuation,
    },

    #[error("invalid value {value:?} for parameter {param}: {reason}")]
    InvalidParameter {
        param: String,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    InvalidParameterCombination(String),

    #[error("the {0} parameter must be set")]
    MissingParameter(String),

    #[error("unrecognized {kind} module: {name}")]
    UnknownModule { kind: &'static str, name: String },

    #[error("a single {module} row exceeds the maximum result size")]
    ResultTooLarge { module: String },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl QueryError {
    pub fn invalid_parameter(
        param: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// The API error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadContinuation { .. } => "badcontinue",
            Self::InvalidParameter { .. } => "badvalue",
            Self::InvalidParameterCombination(_) => "invalidparammix",
            Self::MissingParameter(_) => "missingparam",
            Self::UnknownModule { .. } => "unknown_module",
            Self::ResultTooLarge { .. } => "resultsize",
            Self::Storage(_) => "internal_api_error_DBQueryError",
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }

    pub fn to_response(&self) -> Value {
        json!({
            "error": {
                "code": self.code(),
                "info": self.to_string(),
            }
        })
    }
}
