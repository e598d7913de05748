use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
    #[display("failed to read credential file")]
    Credential,
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("no such notification")]
    NonexistentNotification,
}

/// Errors raised by an `Aggregator::download` call.
#[derive(Debug, Display, Error)]
pub enum AggregatorError {
    #[display("failed to reach {aggregator}")]
    FetchFailed { aggregator: &'static str },
    #[display("malformed response from {aggregator}")]
    DecodeFailed { aggregator: &'static str },
}

/// Errors raised while lexing, parsing, rewriting, validating or evaluating
/// a rule expression. These are the user-facing `WrongCondition` /
/// `NonexistentAggregator` / `NonexistentTicker` / `ValueError` kinds,
/// gathered into one enum rather than a parallel error-per-pass system.
#[derive(Debug, Display, Error)]
pub enum ExpressionError {
    #[display("wrong condition: {reason}")]
    WrongCondition { reason: String },
    #[display("there's no such aggregator as {short}")]
    NonexistentAggregator { short: String },
    #[display("ticker {name} is not in scope")]
    NonexistentTicker { name: String },
    #[display("start time is not before end time")]
    ValueError,
    #[display("unknown aggregator {aggregator:?}")]
    UnknownAggregator { aggregator: crate::model::Aggregator },
}

/// Errors raised by the store-keeper's `GetTicker` before a fetch ever
/// reaches an adapter. `Fetch` wraps a failure from the adapter or the
/// underlying store and carries the same disposition as
/// `AggregatorError::FetchFailed` — logged, evaluation skipped this tick.
#[derive(Debug, Display, Error)]
pub enum StoreKeeperError {
    #[display("start time is not before end time")]
    ValueError,
    #[display("unknown aggregator {aggregator:?}")]
    UnknownAggregator { aggregator: crate::model::Aggregator },
    #[display("failed to fetch ticker data")]
    Fetch,
}

/// Errors surfaced by `ConditionProcessor::create_condition` and
/// `remove_notification` — the only operations that report failure back to
/// the caller synchronously rather than being logged and swallowed by a
/// background tick.
#[derive(Debug, Display, Error)]
pub enum ConditionError {
    #[display("wrong condition: {reason}")]
    WrongCondition { reason: String },
    #[display("there's no such aggregator as {short}")]
    NonexistentAggregator { short: String },
    #[display("ticker {name} is not in scope")]
    NonexistentTicker { name: String },
    #[display("failed to fetch ticker data while validating the condition")]
    FetchFailed,
    #[display("no such notification")]
    NonexistentNotification,
    #[display("storage operation failed")]
    Storage,
}

impl From<&ExpressionError> for ConditionError {
    fn from(value: &ExpressionError) -> Self {
        match value {
            ExpressionError::WrongCondition { reason } => Self::WrongCondition {
                reason: reason.clone(),
            },
            ExpressionError::NonexistentAggregator { short } => Self::NonexistentAggregator {
                short: short.clone(),
            },
            ExpressionError::NonexistentTicker { name } => Self::NonexistentTicker {
                name: name.clone(),
            },
            ExpressionError::ValueError => Self::WrongCondition {
                reason: "start time is not before end time".into(),
            },
            ExpressionError::UnknownAggregator { aggregator } => Self::WrongCondition {
                reason: format!("unknown aggregator {aggregator:?}"),
            },
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("runtime error")]
    Runtime,
}
