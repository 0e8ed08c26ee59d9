//! # Domain Models
//!
//! Canonical value types shared by the backpressure, resilience and quality
//! subsystems.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`InstrumentId`] | Validated upstream instrument identifier |
//! | [`PriceTick`] | Bid/ask/last/volume/timestamp, each nullable |
//! | [`PriceSnapshot`] | A processed tick as held in the snapshot store |
//! | [`RawFields`] | Raw field map delivered by the feed adapter |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Ticks are immutable once built. The snapshot store replaces them
//! wholesale on update.

mod instrument;
mod tick;
mod timestamp;

pub use instrument::InstrumentId;
pub use tick::{fields, PriceSnapshot, PriceTick, RawFields};
pub use timestamp::UtcDateTime;
