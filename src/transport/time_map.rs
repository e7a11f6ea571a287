//! Musical position <-> absolute clock time conversion.
//!
//! A [`TimeMap`] is fixed for the lifetime of one run: it pairs the run's
//! start time (the downbeat of bar 0, right after the count-in) with the
//! tempo the run was started at. Both onset generation and judgment go
//! through it, so they can never disagree about when a note is due.

/// Beats in one bar. Only 4/4 is supported.
pub const BEATS_PER_BAR: u32 = 4;

/// Slowest supported tempo.
pub const MIN_BPM: f64 = 40.0;

/// Fastest supported tempo.
pub const MAX_BPM: f64 = 240.0;

/// Clamp a tempo into the supported range. Non-finite input falls back to the minimum.
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() {
        bpm.clamp(MIN_BPM, MAX_BPM)
    } else {
        MIN_BPM
    }
}

/// A musical position derived from elapsed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub bar: u64,
    /// Beat within the bar, `0..BEATS_PER_BAR`.
    pub beat: u32,
    /// Progress through the current beat, `[0, 1)`.
    pub beat_fraction: f64,
}

impl Position {
    /// Position in beats since bar 0, beat 0.
    pub fn as_beats(&self) -> f64 {
        (self.bar * BEATS_PER_BAR as u64) as f64 + self.beat_in_bar()
    }

    /// Beats into the current bar, `[0, BEATS_PER_BAR)`.
    pub fn beat_in_bar(&self) -> f64 {
        self.beat as f64 + self.beat_fraction
    }
}

/// Conversion between musical positions and absolute seconds for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeMap {
    start_time_sec: f64,
    bpm: f64,
}

impl TimeMap {
    /// `bpm` is clamped to the supported range.
    pub fn new(start_time_sec: f64, bpm: f64) -> Self {
        Self {
            start_time_sec,
            bpm: clamp_bpm(bpm),
        }
    }

    /// Clock time of bar 0, beat 0.
    pub fn start_time_sec(&self) -> f64 {
        self.start_time_sec
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Duration of one sixteenth note.
    pub fn sixteenth_sec(&self) -> f64 {
        self.seconds_per_beat() / 4.0
    }

    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_beat() * BEATS_PER_BAR as f64
    }

    /// `start + (bar * 4 + beat + n / d) * seconds_per_beat`.
    ///
    /// A zero denominator is treated as "on the beat".
    pub fn position_to_time(&self, bar: u64, beat: u32, n: u32, d: u32) -> f64 {
        let fraction = if d == 0 { 0.0 } else { n as f64 / d as f64 };
        let beats = (bar * BEATS_PER_BAR as u64) as f64 + beat as f64 + fraction;
        self.beats_to_time(beats)
    }

    /// Clock time `beats` after the start. Negative values land in the count-in.
    pub fn beats_to_time(&self, beats: f64) -> f64 {
        self.start_time_sec + beats * self.seconds_per_beat()
    }

    /// Musical position at clock time `time_sec`, or `None` before the start.
    pub fn position_at(&self, time_sec: f64) -> Option<Position> {
        let elapsed = time_sec - self.start_time_sec;
        if elapsed < 0.0 {
            return None;
        }
        let total_beats = elapsed / self.seconds_per_beat();
        let whole = total_beats.floor();
        let whole_beats = whole as u64;
        Some(Position {
            bar: whole_beats / BEATS_PER_BAR as u64,
            beat: (whole_beats % BEATS_PER_BAR as u64) as u32,
            beat_fraction: total_beats - whole,
        })
    }

    /// Index of the bar playing at `time_sec`, or `None` before the start.
    pub fn bar_at(&self, time_sec: f64) -> Option<u64> {
        self.position_at(time_sec).map(|p| p.bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn clamps_tempo() {
        assert_approx_eq!(clamp_bpm(10.0), MIN_BPM);
        assert_approx_eq!(clamp_bpm(999.0), MAX_BPM);
        assert_approx_eq!(clamp_bpm(133.0), 133.0);
        assert_approx_eq!(clamp_bpm(f64::NAN), MIN_BPM);
    }

    #[test]
    fn position_to_time_at_120_bpm() {
        let map = TimeMap::new(2.0, 120.0);
        assert_approx_eq!(map.position_to_time(0, 0, 0, 4), 2.0);
        assert_approx_eq!(map.position_to_time(0, 1, 0, 4), 2.5);
        assert_approx_eq!(map.position_to_time(1, 0, 0, 4), 4.0);
        assert_approx_eq!(map.position_to_time(0, 0, 1, 4), 2.125);
        assert_approx_eq!(map.position_to_time(0, 2, 1, 3), 3.0 + 0.5 / 3.0);
    }

    #[test]
    fn zero_denominator_is_on_the_beat() {
        let map = TimeMap::new(0.0, 60.0);
        assert_approx_eq!(map.position_to_time(0, 3, 2, 0), 3.0);
    }

    #[test]
    fn position_to_time_is_strictly_increasing() {
        let map = TimeMap::new(0.5, 97.0);
        let mut positions = Vec::new();
        for bar in 0..3u64 {
            for beat in 0..BEATS_PER_BAR {
                for d in [3u32, 4, 5] {
                    for n in 0..d {
                        positions.push((bar, beat, n, d));
                    }
                }
            }
        }
        positions.sort_by(|a, b| {
            let ka = (a.0, a.1, a.2 as f64 / a.3 as f64);
            let kb = (b.0, b.1, b.2 as f64 / b.3 as f64);
            ka.partial_cmp(&kb).unwrap()
        });
        positions.dedup_by(|a, b| {
            a.0 == b.0 && a.1 == b.1 && (a.2 as f64 / a.3 as f64) == (b.2 as f64 / b.3 as f64)
        });
        for pair in positions.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(
                map.position_to_time(a.0, a.1, a.2, a.3) < map.position_to_time(b.0, b.1, b.2, b.3),
                "{a:?} !< {b:?}"
            );
        }
    }

    #[test]
    fn negative_beats_fall_in_count_in() {
        let map = TimeMap::new(4.0, 60.0);
        assert_approx_eq!(map.beats_to_time(-4.0), 0.0);
    }

    #[test]
    fn position_at_before_start_is_none() {
        let map = TimeMap::new(3.0, 120.0);
        assert!(map.position_at(2.99).is_none());
        assert!(map.bar_at(0.0).is_none());
    }

    #[test]
    fn position_at_derives_bar_beat_fraction() {
        let map = TimeMap::new(1.0, 120.0);
        // 2.25 s after start = 4.5 beats = bar 1, beat 0, half way
        let pos = map.position_at(3.25).unwrap();
        assert_eq!(pos.bar, 1);
        assert_eq!(pos.beat, 0);
        assert_approx_eq!(pos.beat_fraction, 0.5);
        assert_approx_eq!(pos.as_beats(), 4.5);
    }

    #[test]
    fn durations_scale_with_tempo() {
        let slow = TimeMap::new(0.0, 60.0);
        let fast = TimeMap::new(0.0, 120.0);
        assert_approx_eq!(slow.seconds_per_beat(), 1.0);
        assert_approx_eq!(fast.sixteenth_sec(), 0.125);
        assert_approx_eq!(fast.seconds_per_bar(), 2.0);
    }
}
