pub mod moex;
pub mod moex_analytic;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::AggregatorError;
use crate::model::{Aggregator, CandleRow, TickerNaming};
use moex::MoexClient;
use moex_analytic::MoexAnalyticClient;

/// Credentials for the MOEX analytics adapter, read from `res/moex.key`.
/// Absent when the file isn't present; the adapter then fails any
/// `download` call with `FetchFailed` rather than attempting an
/// unauthenticated request.
#[derive(Debug, Clone)]
pub struct MoexCredentials {
    pub login: String,
    pub password: String,
}

/// Sealed dispatch over the upstream sources this crate knows how to talk
/// to. A new source means a new variant and a new arm in `download`; there
/// is no duck-typed adapter trait to implement.
pub enum AggregatorClient {
    Moex(MoexClient),
    MoexAnalytic(MoexAnalyticClient),
}

impl AggregatorClient {
    pub fn new(kind: Aggregator, moex_credentials: Option<MoexCredentials>) -> Self {
        match kind {
            Aggregator::Moex => Self::Moex(MoexClient::new()),
            Aggregator::MoexAnalytic => Self::MoexAnalytic(MoexAnalyticClient::new(moex_credentials)),
        }
    }

    /// Fetch rows for `naming` across the half-open window `[start, end)`.
    /// Columns present in the returned rows depend on the variant; ordering
    /// is ascending by `datetime` with no duplicate timestamps. An empty
    /// vector is a legal "no data in this window" result.
    pub fn download(
        &self,
        naming: &TickerNaming,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<CandleRow>, Report<AggregatorError>>> {
        match self {
            Self::Moex(client) => client.download(naming, start, end),
            Self::MoexAnalytic(client) => client.download(naming, start, end),
        }
    }
}
