use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an upstream market-data source.
///
/// Extension is anticipated (Polygon and Yahoo sources have been floated
/// but aren't wired up); adding one here means adding a variant and a
/// dispatch arm, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    Moex,
    MoexAnalytic,
}

impl Aggregator {
    /// Lowercase short code used inside generated candle-table names
    /// (`moex_YNDX_T`, `mxnl_RIZ3_H`).
    pub fn short_code(self) -> &'static str {
        match self {
            Self::Moex => "moex",
            Self::MoexAnalytic => "mxnl",
        }
    }

    /// Uppercase four-letter code accepted in rule-expression syntax
    /// (`#MXNL:RIZ3...`). Parsing is case-insensitive; this is the
    /// canonical spelling used when a naming is rendered back to text.
    pub fn dsl_code(self) -> &'static str {
        match self {
            Self::Moex => "MOEX",
            Self::MoexAnalytic => "MXNL",
        }
    }

    /// Parse a user-supplied short code, case-insensitively.
    pub fn from_short(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "moex" => Some(Self::Moex),
            "mxnl" => Some(Self::MoexAnalytic),
            _ => None,
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moex => write!(f, "moex"),
            Self::MoexAnalytic => write!(f, "moex_analytic"),
        }
    }
}

/// Enumerated bar width. The DSL encodes these as single letters;
/// `C` ("current") is a surface-syntax alias for `Minute`, not a variant
/// of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSpan {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
}

impl TimeSpan {
    /// Parse one of the DSL interval letters. `C` is accepted here as an
    /// alias for `T` (minute); callers that need to distinguish "omitted"
    /// from "explicit C" do so before calling this.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'C' | 'T' => Some(Self::Minute),
            'H' => Some(Self::Hour),
            'D' => Some(Self::Day),
            'W' => Some(Self::Week),
            'M' => Some(Self::Month),
            'Q' => Some(Self::Quarter),
            _ => None,
        }
    }

    /// The letter used for database/storage naming. Always the canonical
    /// letter, never `C`.
    pub fn db_interval(self) -> char {
        match self {
            Self::Minute => 'T',
            Self::Hour => 'H',
            Self::Day => 'D',
            Self::Week => 'W',
            Self::Month => 'M',
            Self::Quarter => 'Q',
        }
    }

    /// Bar width in minutes, used to translate relative bar offsets to
    /// wall-clock time.
    pub fn to_minutes(self) -> i64 {
        match self {
            Self::Minute => 1,
            Self::Hour => 60,
            Self::Day => 60 * 24,
            Self::Week => 60 * 24 * 7,
            Self::Month => 60 * 24 * 30,
            Self::Quarter => 60 * 24 * 30 * 3,
        }
    }

    /// MOEX ISS interval code: distinct from `to_minutes` for
    /// `day`/`week`/etc, which the upstream API encodes as
    /// bar-count-per-unit rather than minutes.
    pub fn moex_interval(self) -> u32 {
        match self {
            Self::Minute => 1,
            Self::Hour => 60,
            Self::Day => 24,
            Self::Week => 7,
            Self::Month => 31,
            Self::Quarter => 4,
        }
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.db_interval())
    }
}

/// One numeric field within a candle/analytic row. Each variant carries
/// its canonical storage column name and its DSL reference code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Mean,
    Vol,
    High,
    Low,
    Long,
    Short,
    LongNumb,
    ShortNumb,
}

impl Column {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "mean" => Some(Self::Mean),
            "vol" => Some(Self::Vol),
            "high" => Some(Self::High),
            "low" => Some(Self::Low),
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            "long_numb" => Some(Self::LongNumb),
            "short_numb" => Some(Self::ShortNumb),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Vol => "vol",
            Self::High => "high",
            Self::Low => "low",
            Self::Long => "long",
            Self::Short => "short",
            Self::LongNumb => "long_numb",
            Self::ShortNumb => "short_numb",
        }
    }

    /// Canonical storage column name, as named in the `ticker` data
    /// tables.
    pub fn storage_name(self) -> &'static str {
        match self {
            Self::Mean => "mean_price",
            Self::Vol => "volume",
            Self::High => "high",
            Self::Low => "low",
            Self::Long => "long",
            Self::Short => "short",
            Self::LongNumb => "number_long",
            Self::ShortNumb => "number_short",
        }
    }
}

/// A fully-qualified ticker request handle. Two namings are equal iff
/// every field matches, including the MOEX market/engine hints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TickerNaming {
    pub symbol: String,
    pub aggregator: Aggregator,
    pub timespan: TimeSpan,
    pub market: String,
    pub engine: String,
}

impl TickerNaming {
    pub fn new(symbol: impl Into<String>, aggregator: Aggregator, timespan: TimeSpan) -> Self {
        Self {
            symbol: symbol.into(),
            aggregator,
            timespan,
            market: "shares".to_string(),
            engine: "stock".to_string(),
        }
    }

    /// Deterministic physical table name: `<aggShort>_<name>_<dbInterval>`.
    pub fn storing_name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.aggregator.short_code(),
            self.symbol,
            self.timespan.db_interval()
        )
    }
}

/// Catalogue entry pointing at a physical candle table, created lazily on
/// first fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerRecord {
    pub id: i64,
    pub name: String,
    pub aggregator: Aggregator,
    pub timespan: TimeSpan,
}

/// One row of market data. Which fields are populated depends on the
/// aggregator: MOEX populates `mean_price`/`volume`/`high`/`low`; MOEX
/// analytics populates `long`/`short`/`number_long`/`number_short`. The
/// `datetime` column is always present and is the row's primary key
/// within a ticker table.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CandleRow {
    pub datetime: i64,
    pub mean_price: Option<f64>,
    pub volume: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub long: Option<f64>,
    pub short: Option<f64>,
    pub number_long: Option<f64>,
    pub number_short: Option<f64>,
}

impl CandleRow {
    pub fn get(&self, column: Column) -> Option<f64> {
        match column {
            Column::Mean => self.mean_price,
            Column::Vol => self.volume,
            Column::High => self.high,
            Column::Low => self.low,
            Column::Long => self.long,
            Column::Short => self.short,
            Column::LongNumb => self.number_long,
            Column::ShortNumb => self.number_short,
        }
    }
}

/// A persisted rule plus its owning chat.
///
/// `origin_condition` is the raw text the user typed, kept for display
/// (`/list`); `compiled_condition` is the rewritten form the evaluator
/// actually walks.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub chat_id: i64,
    pub compiled_condition: String,
    pub origin_condition: String,
}
