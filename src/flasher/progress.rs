use super::types::{FlashProgress, FlashStage};

/// Percentage at which the write stage starts.
pub const WRITE_BASE: f64 = 20.0;
/// Share of the overall bar taken by the write stage.
pub const WRITE_RANGE: f64 = 75.0;
/// Highest percentage reported before the write call has returned.
pub const WRITE_CEILING: u8 = 95;

/// Maps the progress of part `part_index` (of `part_count`) onto the
/// overall bar. Every part gets an equal slice of the write range.
pub fn overall_percentage(part_index: usize, part_count: usize, written_ratio: f64) -> f64 {
    if part_count == 0 {
        return WRITE_BASE;
    }
    let ratio = written_ratio.clamp(0.0, 1.0);
    let per_part = WRITE_RANGE / part_count as f64;
    WRITE_BASE + part_index.min(part_count) as f64 * per_part + ratio * per_part
}

/// Builds the progress records of one flash attempt.
///
/// The reported percentage never decreases, and write progress is held at
/// [`WRITE_CEILING`] until the attempt finishes.
#[derive(Debug)]
pub struct ProgressTracker {
    total_parts: usize,
    percentage: u8,
    current_part: usize,
    bytes_written: u64,
    bytes_total: u64,
}

impl ProgressTracker {
    pub fn new(total_parts: usize) -> Self {
        Self {
            total_parts,
            percentage: 0,
            current_part: 0,
            bytes_written: 0,
            bytes_total: 0,
        }
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    fn advance(&mut self, percentage: u8) {
        self.percentage = self.percentage.max(percentage.min(100));
    }

    fn record(&self, stage: FlashStage) -> FlashProgress {
        FlashProgress {
            stage,
            percentage: self.percentage,
            current_part: self.current_part,
            total_parts: self.total_parts,
            bytes_written: self.bytes_written,
            bytes_total: self.bytes_total,
            error: None,
        }
    }

    /// A stage transition at a fixed point of the pipeline.
    pub fn stage(&mut self, stage: FlashStage, percentage: u8) -> FlashProgress {
        self.advance(percentage);
        self.record(stage)
    }

    /// Write progress reported by the loader for one part.
    pub fn part(&mut self, index: usize, written: u64, total: u64) -> FlashProgress {
        let ratio = if total > 0 {
            written as f64 / total as f64
        } else {
            0.0
        };
        let overall = overall_percentage(index, self.total_parts, ratio).round();
        self.advance((overall as u8).min(WRITE_CEILING));

        self.current_part = index;
        self.bytes_written = written;
        self.bytes_total = total;
        self.record(FlashStage::Flashing)
    }

    /// Stage change inside the write call (erasing, verifying) that keeps
    /// the current percentage.
    pub fn write_stage(&mut self, stage: FlashStage, part: Option<usize>) -> FlashProgress {
        if let Some(index) = part {
            self.current_part = index;
        }
        self.record(stage)
    }

    pub fn done(&mut self) -> FlashProgress {
        self.advance(100);
        self.record(FlashStage::Done)
    }

    /// Terminal error record. The percentage stays where the attempt stopped.
    pub fn error(&self, message: impl Into<String>) -> FlashProgress {
        let mut record = self.record(FlashStage::Error);
        record.error = Some(message.into());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_share_the_write_range() {
        assert_eq!(overall_percentage(0, 4, 0.0), 20.0);
        assert_eq!(overall_percentage(0, 4, 1.0), 38.75);
        assert_eq!(overall_percentage(2, 4, 0.5), 66.875);
        assert_eq!(overall_percentage(3, 4, 1.0), 95.0);
        assert_eq!(overall_percentage(0, 1, 0.5), 57.5);
    }

    #[test]
    fn ratio_is_clamped() {
        assert_eq!(overall_percentage(1, 2, 7.0), 95.0);
        assert_eq!(overall_percentage(1, 2, -1.0), 57.5);
        assert_eq!(overall_percentage(0, 0, 0.5), WRITE_BASE);
    }

    #[test]
    fn tracker_is_monotone() {
        let mut tracker = ProgressTracker::new(2);
        assert_eq!(tracker.stage(FlashStage::Connected, 5).percentage, 5);
        assert_eq!(tracker.part(1, 50, 100).percentage, 76);
        // A late report for an earlier part must not move the bar back.
        assert_eq!(tracker.part(0, 10, 100).percentage, 76);
        assert_eq!(tracker.stage(FlashStage::Preparing, 10).percentage, 76);
    }

    #[test]
    fn write_progress_stops_at_ceiling() {
        let mut tracker = ProgressTracker::new(3);
        let record = tracker.part(2, 4096, 4096);
        assert_eq!(record.percentage, WRITE_CEILING);
        assert_eq!(record.bytes_written, 4096);
        assert_eq!(record.current_part, 2);
        assert_eq!(record.total_parts, 3);

        assert_eq!(tracker.done().percentage, 100);
    }

    #[test]
    fn zero_length_part_counts_as_not_started() {
        let mut tracker = ProgressTracker::new(4);
        assert_eq!(tracker.part(1, 0, 0).percentage, 39);
    }

    #[test]
    fn error_keeps_percentage() {
        let mut tracker = ProgressTracker::new(1);
        tracker.stage(FlashStage::Preparing, 10);
        let record = tracker.error("boom");
        assert_eq!(record.stage, FlashStage::Error);
        assert_eq!(record.percentage, 10);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }
}
