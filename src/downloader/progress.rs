//! Throughput, ETA and notification throttling for one transfer unit.

use std::time::Duration;
use tokio::time::Instant;

use super::models::TransferEntry;

/// Reference interval between two external progress notifications
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_secs(20);

/// Per-unit progress state.
///
/// The speed baseline restarts with every attempt: the first sample of an
/// attempt only records where the attempt started, which may be well past
/// zero when a partial file is resumed. The notification throttle and the
/// high-water mark live as long as the unit.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    notify_interval: Duration,
    last_bytes: u64,
    last_sample_at: Instant,
    awaiting_baseline: bool,
    last_notified_at: Option<Instant>,
    high_water: u64,
    last_quarter: u8,
}

/// What a sample asks the caller to do beyond mutating the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOutcome {
    pub notify: bool,
    /// Set when the sample crossed a 25% boundary
    pub milestone: Option<u8>,
}

impl ProgressTracker {
    pub fn new(notify_interval: Duration, now: Instant) -> Self {
        Self {
            notify_interval,
            last_bytes: 0,
            last_sample_at: now,
            awaiting_baseline: true,
            last_notified_at: None,
            high_water: 0,
            last_quarter: 0,
        }
    }

    /// Resets the speed baseline for a new attempt
    pub fn begin_attempt(&mut self, now: Instant) {
        self.last_bytes = 0;
        self.last_sample_at = now;
        self.awaiting_baseline = true;
    }

    /// Applies one byte-count sample to `entry`
    pub fn on_sample(
        &mut self,
        entry: &mut TransferEntry,
        current: u64,
        total: u64,
        now: Instant,
    ) -> SampleOutcome {
        let elapsed = now.saturating_duration_since(self.last_sample_at).as_secs_f64();
        if std::mem::take(&mut self.awaiting_baseline) {
            entry.speed_kbps = 0.0;
        } else if elapsed > 0.0 {
            let delta = current.saturating_sub(self.last_bytes) as f64;
            entry.speed_kbps = round1(delta / elapsed / 1024.0);
        }
        self.last_bytes = current;
        self.last_sample_at = now;

        // A restarted attempt may report fewer bytes than already seen
        let current = current.max(self.high_water);
        self.high_water = current;

        // zero means the size is still unknown
        let total = if total == 0 { 0 } else { total.max(current) };
        entry.downloaded_bytes = current;
        entry.total_bytes = total;
        entry.progress_percent = if total == 0 {
            0.0
        } else {
            round1(current as f64 / total as f64 * 100.0)
        };
        entry.pending_seconds = if entry.speed_kbps > 0.0 && total > 0 {
            Some((total - current) as f64 / (entry.speed_kbps * 1024.0))
        } else {
            None
        };

        SampleOutcome {
            notify: self.notification_due(now),
            milestone: self.milestone(entry.progress_percent),
        }
    }

    fn milestone(&mut self, percent: f64) -> Option<u8> {
        let quarter = ((percent / 25.0).floor() as u8).min(4);
        if quarter > self.last_quarter {
            self.last_quarter = quarter;
            Some(quarter * 25)
        } else {
            None
        }
    }

    fn notification_due(&mut self, now: Instant) -> bool {
        let due = match self.last_notified_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.notify_interval,
        };
        if due {
            self.last_notified_at = Some(now);
        }
        due
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_percent_and_eta() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(DEFAULT_NOTIFY_INTERVAL, start);
        let mut entry = TransferEntry::new("report.pdf");

        tracker.on_sample(&mut entry, 0, 4096, start);
        tracker.on_sample(&mut entry, 1024, 4096, start + Duration::from_secs(1));

        assert_eq!(entry.speed_kbps, 1.0);
        assert_eq!(entry.progress_percent, 25.0);
        assert_eq!(entry.downloaded_bytes, 1024);
        assert_eq!(entry.total_bytes, 4096);
        assert_eq!(entry.pending_seconds, Some(3.0));
    }

    #[test]
    fn unknown_total_is_zero_percent() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(DEFAULT_NOTIFY_INTERVAL, start);
        let mut entry = TransferEntry::new("stream.bin");

        tracker.on_sample(&mut entry, 0, 0, start);

        assert_eq!(entry.progress_percent, 0.0);
        assert_eq!(entry.speed_kbps, 0.0);
        assert_eq!(entry.pending_seconds, None);
    }

    #[test]
    fn zero_elapsed_keeps_previous_speed() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(DEFAULT_NOTIFY_INTERVAL, start);
        let mut entry = TransferEntry::new("a.bin");
        tracker.on_sample(&mut entry, 0, 8192, start);

        let t1 = start + Duration::from_secs(2);
        tracker.on_sample(&mut entry, 2048, 8192, t1);
        assert_eq!(entry.speed_kbps, 1.0);

        tracker.on_sample(&mut entry, 4096, 8192, t1);
        assert_eq!(entry.speed_kbps, 1.0);
        assert_eq!(entry.downloaded_bytes, 4096);
    }

    #[test]
    fn resumed_attempt_starts_from_its_first_sample() {
        const MIB: u64 = 1024 * 1024;
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(DEFAULT_NOTIFY_INTERVAL, start);
        let mut entry = TransferEntry::new("movie.mkv");

        tracker.begin_attempt(start);
        tracker.on_sample(&mut entry, 100 * MIB, 200 * MIB, start + Duration::from_millis(50));

        assert_eq!(entry.speed_kbps, 0.0);
        assert_eq!(entry.pending_seconds, None);
        assert_eq!(entry.downloaded_bytes, 100 * MIB);
        assert_eq!(entry.progress_percent, 50.0);

        tracker.on_sample(&mut entry, 101 * MIB, 200 * MIB, start + Duration::from_millis(1050));

        assert_eq!(entry.speed_kbps, 1024.0);
        assert_eq!(entry.pending_seconds, Some(99.0));
    }

    #[test]
    fn downloaded_bytes_never_decrease_within_a_run() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(DEFAULT_NOTIFY_INTERVAL, start);
        let mut entry = TransferEntry::new("a.bin");

        let mut observed = Vec::new();
        let mut at = start;
        for (i, current) in [100, 500, 900].into_iter().enumerate() {
            at += Duration::from_millis(100 * (i as u64 + 1));
            tracker.on_sample(&mut entry, current, 1000, at);
            observed.push(entry.downloaded_bytes);
        }

        // second attempt restarts from zero
        tracker.begin_attempt(at);
        for current in [200, 950, 1000] {
            at += Duration::from_millis(100);
            tracker.on_sample(&mut entry, current, 1000, at);
            observed.push(entry.downloaded_bytes);
        }

        assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(entry.downloaded_bytes, 1000);
        assert_eq!(entry.progress_percent, 100.0);
    }

    #[test]
    fn notifications_are_throttled() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(Duration::from_secs(20), start);
        let mut entry = TransferEntry::new("big.iso");

        // one sample every 100ms for 25 seconds
        let mut notifications = 0;
        for step in 1..=250u64 {
            let now = start + Duration::from_millis(step * 100);
            if tracker.on_sample(&mut entry, step * 1024, 250 * 1024, now).notify {
                notifications += 1;
            }
        }

        assert!(notifications <= 3, "sent {notifications} notifications");
        assert!(notifications >= 1);
    }

    #[test]
    fn milestones_fire_once_per_quarter() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(DEFAULT_NOTIFY_INTERVAL, start);
        let mut entry = TransferEntry::new("a.bin");

        let milestones: Vec<_> = [10, 30, 40, 80, 100]
            .into_iter()
            .enumerate()
            .filter_map(|(i, current)| {
                let now = start + Duration::from_secs(i as u64 + 1);
                tracker.on_sample(&mut entry, current, 100, now).milestone
            })
            .collect();

        assert_eq!(milestones, vec![25, 75, 100]);
    }
}
