//! Link counters

/// Counters kept by an [`HdlcConnection`](crate::hdlc::HdlcConnection)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HdlcStatistics {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames dropped for a bad check sequence or malformed header
    pub frames_discarded: u64,
    /// Well-formed frames addressed to another station
    pub frames_foreign: u64,
    pub segments_sent: u64,
    pub segments_received: u64,
    pub timeouts: u64,
    pub sequence_errors: u64,
}

impl HdlcStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Share of received frames that had to be discarded, in percent
    pub fn discard_rate(&self) -> f64 {
        let seen = self.frames_received + self.frames_discarded;
        if seen == 0 {
            0.0
        } else {
            self.frames_discarded as f64 * 100.0 / seen as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_rate() {
        let mut stats = HdlcStatistics::new();
        assert_eq!(stats.discard_rate(), 0.0);
        stats.frames_received = 3;
        stats.frames_discarded = 1;
        assert_eq!(stats.discard_rate(), 25.0);
        stats.clear();
        assert_eq!(stats, HdlcStatistics::default());
    }
}
