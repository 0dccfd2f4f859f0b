//! Quality probe (§4.M): a paced UDP burst generator run in parallel
//! with an encode benchmark, producing `qualityTestResult`.

use std::time::Duration;

use mirage_encode::{EncodeBenchmarkRecord, QualityStage};

/// Fixed UDP overhead (data-frame header) added to every probe
/// packet's payload when computing packets-per-second.
const HEADER_SIZE_BYTES: u32 = 12;

/// Upper bound on packets sent in a single tick, so a very high
/// target bitrate doesn't starve the async runtime in one poll.
const MAX_BURST_PER_TICK: u32 = 1024;

/// Paces UDP packets for one [`QualityStage`], carrying a fractional
/// packet budget forward across ticks so long-run throughput matches
/// the target bitrate even though each tick sends a whole number of
/// packets.
pub struct PacedBurstGenerator {
    stage: QualityStage,
    payload_len: u32,
    packets_per_second: f64,
    budget: f64,
}

impl PacedBurstGenerator {
    #[must_use]
    pub fn new(stage: QualityStage, payload_len: u32) -> Self {
        let packet_size = (payload_len + HEADER_SIZE_BYTES).max(1);
        let packets_per_second = f64::from(stage.target_bitrate_bps) / 8.0 / f64::from(packet_size);
        Self {
            stage,
            payload_len,
            packets_per_second,
            budget: 0.0,
        }
    }

    /// The tick interval to drive this generator at.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        let per_tick = (1.0 / self.packets_per_second.max(f64::MIN_POSITIVE)).max(0.001);
        Duration::from_secs_f64(per_tick)
    }

    /// Advance by `dt` and return how many packets to send this tick,
    /// capped at [`MAX_BURST_PER_TICK`] with the remainder carried
    /// into `budget` for the next tick.
    pub fn tick(&mut self, dt: Duration) -> u32 {
        self.budget += self.packets_per_second * dt.as_secs_f64();
        let send = (self.budget.floor() as u32).min(MAX_BURST_PER_TICK);
        self.budget -= f64::from(send);
        send
    }

    #[must_use]
    pub fn payload_len(&self) -> u32 {
        self.payload_len
    }

    #[must_use]
    pub fn stage(&self) -> QualityStage {
        self.stage
    }
}

/// Result of running a full quality test: the burst's configured
/// stages plus the encode benchmark measured in parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityTestResult {
    pub benchmark: EncodeBenchmarkRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_per_second_matches_target_bitrate() {
        let stage = QualityStage {
            target_bitrate_bps: 8_000_000,
            duration_ms: 1000,
        };
        let generator = PacedBurstGenerator::new(stage, 1000 - HEADER_SIZE_BYTES as u32);
        // 8 Mbps / (8 bits * 1000 bytes/packet) = 1000 packets/sec
        assert!((generator.packets_per_second - 1000.0).abs() < 1.0);
    }

    #[test]
    fn tick_carries_fractional_budget_forward() {
        let stage = QualityStage {
            target_bitrate_bps: 100,
            duration_ms: 1000,
        };
        let mut generator = PacedBurstGenerator::new(stage, 88);
        let mut total = 0;
        for _ in 0..100 {
            total += generator.tick(Duration::from_millis(10));
        }
        // Over a full second the packet count should roughly match pps.
        let expected = generator.packets_per_second;
        assert!((f64::from(total) - expected).abs() <= 2.0);
    }

    #[test]
    fn burst_is_capped_per_tick() {
        let stage = QualityStage {
            target_bitrate_bps: 10_000_000_000,
            duration_ms: 1000,
        };
        let mut generator = PacedBurstGenerator::new(stage, 1);
        let sent = generator.tick(Duration::from_secs(1));
        assert!(sent <= MAX_BURST_PER_TICK);
    }
}
