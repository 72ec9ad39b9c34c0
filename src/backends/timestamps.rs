// SPDX-License-Identifier: MPL-2.0

//! Running-time conversion
//!
//! Buffers leaving the capture graph carry stream time. Consumers living in
//! their own pipelines expect timestamps that start from zero, so the
//! fan-out tap rewrites PTS/DTS into running time of the capture segment.

/// The parts of a time segment needed for conversion, all in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSegment {
    pub start: u64,
    pub stop: Option<u64>,
    pub base: u64,
    pub rate: f64,
}

impl Default for TimeSegment {
    fn default() -> Self {
        Self {
            start: 0,
            stop: None,
            base: 0,
            rate: 1.0,
        }
    }
}

impl TimeSegment {
    /// Running time of `position`, or `None` when it lies outside the segment
    pub fn to_running_time(&self, position: u64) -> Option<u64> {
        if position < self.start {
            return None;
        }
        if let Some(stop) = self.stop
            && position > stop
        {
            return None;
        }

        let rate = self.rate.abs();
        let offset = if self.rate >= 0.0 {
            position - self.start
        } else {
            self.stop? - position
        };
        let scaled = if rate == 1.0 {
            offset
        } else {
            (offset as f64 / rate) as u64
        };
        self.base.checked_add(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_segment() {
        let segment = TimeSegment {
            start: 5_000,
            stop: None,
            base: 100,
            rate: 1.0,
        };
        assert_eq!(segment.to_running_time(5_000), Some(100));
        assert_eq!(segment.to_running_time(7_500), Some(2_600));
        assert_eq!(segment.to_running_time(4_999), None);
    }

    #[test]
    fn test_position_after_stop_is_clipped() {
        let segment = TimeSegment {
            stop: Some(10),
            ..TimeSegment::default()
        };
        assert_eq!(segment.to_running_time(10), Some(10));
        assert_eq!(segment.to_running_time(11), None);
    }

    #[test]
    fn test_rate_scales_offset() {
        let fast = TimeSegment {
            rate: 2.0,
            ..TimeSegment::default()
        };
        assert_eq!(fast.to_running_time(1_000), Some(500));

        let reverse = TimeSegment {
            start: 0,
            stop: Some(1_000),
            base: 0,
            rate: -1.0,
        };
        assert_eq!(reverse.to_running_time(400), Some(600));
    }
}
