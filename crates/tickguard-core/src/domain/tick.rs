use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{InstrumentId, UtcDateTime};

/// Raw upstream field names understood by [`PriceTick::from_raw_fields`].
pub mod fields {
    pub const BID: &str = "BID";
    pub const ASK: &str = "ASK";
    pub const LAST: &str = "TRDPRC_1";
    pub const VOLUME: &str = "ACVOL_1";
    pub const TIMESTAMP: &str = "TIMESTAMP";
}

/// Field name to raw string value, as delivered by the feed adapter.
pub type RawFields = BTreeMap<String, String>;

/// One instrument's priced state at a point in time.
///
/// Every field except the instrument may be absent upstream; absence is
/// reported by the completeness check rather than rejected here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub instrument: InstrumentId,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub volume: Option<f64>,
    pub timestamp: Option<UtcDateTime>,
}

/// The stored form of a processed tick.
pub type PriceSnapshot = PriceTick;

impl PriceTick {
    pub fn new(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            bid: None,
            ask: None,
            last: None,
            volume: None,
            timestamp: None,
        }
    }

    pub fn with_bid(mut self, bid: f64) -> Self {
        self.bid = Some(bid);
        self
    }

    pub fn with_ask(mut self, ask: f64) -> Self {
        self.ask = Some(ask);
        self
    }

    pub fn with_last(mut self, last: f64) -> Self {
        self.last = Some(last);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_timestamp(mut self, timestamp: UtcDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds a tick from raw feed fields.
    ///
    /// Unparseable numbers become `None`. A missing or unparseable
    /// `TIMESTAMP` falls back to `received_at`.
    pub fn from_raw_fields(
        instrument: InstrumentId,
        raw: &RawFields,
        received_at: UtcDateTime,
    ) -> Self {
        let timestamp = raw
            .get(fields::TIMESTAMP)
            .and_then(|value| UtcDateTime::parse(value).ok())
            .unwrap_or(received_at);

        Self {
            instrument,
            bid: parse_number(raw, fields::BID),
            ask: parse_number(raw, fields::ASK),
            last: parse_number(raw, fields::LAST),
            volume: parse_number(raw, fields::VOLUME),
            timestamp: Some(timestamp),
        }
    }
}

fn parse_number(raw: &RawFields, field: &str) -> Option<f64> {
    raw.get(field)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}
