//! Synthetic tick source standing in for a live feed adapter.

use std::time::Duration;

use tickguard_core::{fields, InstrumentId, RawFields, UtcDateTime};

/// Ways a generated tick can be corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defect {
    MissingAsk,
    InvertedSpread,
    NegativeBid,
    StaleTimestamp,
    ExcessPrecision,
    Unparseable,
}

const DEFECTS: [Defect; 6] = [
    Defect::MissingAsk,
    Defect::InvertedSpread,
    Defect::NegativeBid,
    Defect::StaleTimestamp,
    Defect::ExcessPrecision,
    Defect::Unparseable,
];

#[derive(Debug)]
struct Walk {
    instrument: InstrumentId,
    mid: f64,
    volume: f64,
}

/// Random-walk quotes over a fixed instrument set, round-robin.
#[derive(Debug)]
pub struct TickGenerator {
    rng: fastrand::Rng,
    walks: Vec<Walk>,
    defect_ratio: f64,
    cursor: usize,
    defects_injected: u64,
}

impl TickGenerator {
    pub fn new(instruments: Vec<InstrumentId>, defect_ratio: f64, seed: Option<u64>) -> Self {
        let mut rng = seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        let walks = instruments
            .into_iter()
            .map(|instrument| Walk {
                instrument,
                mid: 10.0 + rng.f64() * 190.0,
                volume: 0.0,
            })
            .collect();
        Self {
            rng,
            walks,
            defect_ratio: defect_ratio.clamp(0.0, 1.0),
            cursor: 0,
            defects_injected: 0,
        }
    }

    pub fn defects_injected(&self) -> u64 {
        self.defects_injected
    }

    /// Next tick, or `None` when there are no instruments.
    pub fn next_tick(&mut self) -> Option<(InstrumentId, RawFields)> {
        if self.walks.is_empty() {
            return None;
        }
        let index = self.cursor % self.walks.len();
        self.cursor = self.cursor.wrapping_add(1);

        let step = (self.rng.f64() - 0.5) * 0.002;
        let half_spread = 0.0002 + self.rng.f64() * 0.0008;
        let traded = self.rng.u32(1..500) as f64;
        let last_offset = self.rng.f64() - 0.5;

        let walk = &mut self.walks[index];
        walk.mid = (walk.mid * (1.0 + step)).max(0.05);
        walk.volume += traded;
        let bid = round4(walk.mid * (1.0 - half_spread));
        let ask = round4(walk.mid * (1.0 + half_spread));
        let last = round4(walk.mid * (1.0 + half_spread * last_offset));
        let instrument = walk.instrument.clone();
        let volume = walk.volume;

        let mut raw = RawFields::from([
            (fields::BID.to_owned(), format!("{bid:.4}")),
            (fields::ASK.to_owned(), format!("{ask:.4}")),
            (fields::LAST.to_owned(), format!("{last:.4}")),
            (fields::VOLUME.to_owned(), format!("{volume:.0}")),
            (
                fields::TIMESTAMP.to_owned(),
                UtcDateTime::now().format_rfc3339(),
            ),
        ]);

        if self.rng.f64() < self.defect_ratio {
            let defect = DEFECTS[self.rng.usize(..DEFECTS.len())];
            apply_defect(&mut raw, defect, bid, ask);
            self.defects_injected += 1;
        }
        Some((instrument, raw))
    }
}

fn apply_defect(raw: &mut RawFields, defect: Defect, bid: f64, ask: f64) {
    match defect {
        Defect::MissingAsk => {
            raw.remove(fields::ASK);
        }
        Defect::InvertedSpread => {
            raw.insert(fields::BID.to_owned(), format!("{:.4}", ask + 0.01));
        }
        Defect::NegativeBid => {
            raw.insert(fields::BID.to_owned(), format!("{:.4}", -bid));
        }
        Defect::StaleTimestamp => {
            let stale = UtcDateTime::now().minus(Duration::from_secs(300));
            raw.insert(fields::TIMESTAMP.to_owned(), stale.format_rfc3339());
        }
        Defect::ExcessPrecision => {
            raw.insert(fields::BID.to_owned(), format!("{:.9}", bid + 0.000_000_123));
        }
        Defect::Unparseable => {
            raw.insert(fields::LAST.to_owned(), String::from("N/A"));
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
