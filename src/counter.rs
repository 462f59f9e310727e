use std::ops::AddAssign;

use crate::avg::SlidingAvg;

/// Used for counting the running average of throughput rates.
///
/// Bytes are accumulated into the current round, which is folded into the
/// average and the total when the owner ticks the counter. A peer session
/// ticks its download counter once per stored piece.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counter {
    total: u64,
    round: u64,
    avg: SlidingAvg,
}

impl Counter {
    /// Records `bytes` transferred in the current round.
    pub fn add(&mut self, bytes: u64) {
        self.round += bytes;
    }

    /// Closes the current round that lasted `secs` seconds, updating the
    /// rolling rate with the round's throughput.
    pub fn tick(&mut self, secs: f64) {
        let rate = if secs > 0.0 {
            self.round as f64 / secs
        } else {
            self.round as f64
        };
        self.avg.update(rate);
        self.total += self.round;
        self.round = 0;
    }

    /// The rolling average rate in bytes per second, if any round completed.
    pub fn avg(&self) -> Option<f64> {
        if self.avg.is_empty() {
            None
        } else {
            Some(self.avg.mean())
        }
    }

    /// Bytes of all closed rounds plus the current one.
    pub fn total(&self) -> u64 {
        self.total + self.round
    }
}

impl AddAssign<u64> for Counter {
    fn add_assign(&mut self, rhs: u64) {
        self.add(rhs);
    }
}

/// Transfer statistics of a peer session.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThruputCounters {
    /// Piece data downloaded.
    pub payload_down: Counter,
    /// Piece data uploaded.
    pub payload_up: Counter,
    /// Protocol chatter (headers, handshakes, non-piece messages) received.
    pub protocol_down: Counter,
    /// Protocol chatter sent.
    pub protocol_up: Counter,
}
