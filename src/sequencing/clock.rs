use std::time::Instant;

/// Maps wall-clock time to a monotonic beat position.
///
/// The clock is an anchor pair (beat, instant) plus a tempo. Elapsed beats
/// are always derived from the CURRENT anchor, so changing the tempo
/// re-anchors first and the beat position stays continuous through the
/// change. Callers inject `now` so the mapping is testable without sleeping.
#[derive(Debug, Clone)]
pub struct TransportClock {
    bpm: f64,
    anchor_beat: f64,
    anchor_time: Instant,
    running: bool,
}

impl TransportClock {
    pub const MIN_BPM: f64 = 1.0;

    pub fn new(bpm: f64, now: Instant) -> Self {
        Self {
            bpm: bpm.max(Self::MIN_BPM),
            anchor_beat: 0.0,
            anchor_time: now,
            running: false,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Beat position at `now`. Frozen while stopped.
    pub fn current_beat(&self, now: Instant) -> f64 {
        if self.running {
            let elapsed = now.saturating_duration_since(self.anchor_time).as_secs_f64();
            self.anchor_beat + elapsed * self.bpm / 60.0
        } else {
            self.anchor_beat
        }
    }

    /// Start advancing from the current beat position.
    pub fn start(&mut self, now: Instant) {
        self.anchor_time = now;
        self.running = true;
    }

    /// Freeze the beat position.
    pub fn stop(&mut self, now: Instant) {
        self.anchor_beat = self.current_beat(now);
        self.anchor_time = now;
        self.running = false;
    }

    /// Change tempo without a discontinuity in `current_beat`.
    pub fn set_bpm(&mut self, bpm: f64, now: Instant) {
        self.anchor_beat = self.current_beat(now);
        self.anchor_time = now;
        self.bpm = bpm.max(Self::MIN_BPM);
    }

    /// Teleport by `delta` beats (negative allowed, clamped at zero).
    pub fn skip(&mut self, delta: f64, now: Instant) {
        self.anchor_beat = (self.current_beat(now) + delta).max(0.0);
        self.anchor_time = now;
    }

    /// Jump to an absolute beat (external transport, song position pointer).
    pub fn set_beat(&mut self, beat: f64, now: Instant) {
        self.anchor_beat = beat.max(0.0);
        self.anchor_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t0() -> Instant {
        Instant::now()
    }

    #[test]
    fn stopped_clock_does_not_advance() {
        let now = t0();
        let clock = TransportClock::new(120.0, now);
        assert_eq!(clock.current_beat(now + Duration::from_secs(10)), 0.0);
    }

    #[test]
    fn advances_at_tempo() {
        let now = t0();
        let mut clock = TransportClock::new(120.0, now);
        clock.start(now);

        // 120 bpm = 2 beats per second.
        let beat = clock.current_beat(now + Duration::from_secs(3));
        assert!((beat - 6.0).abs() < 1e-9);
    }

    #[test]
    fn bpm_clamped_to_minimum() {
        let now = t0();
        let mut clock = TransportClock::new(0.0, now);
        assert_eq!(clock.bpm(), 1.0);
        clock.set_bpm(-10.0, now);
        assert_eq!(clock.bpm(), 1.0);
    }

    #[test]
    fn set_bpm_is_continuous() {
        let now = t0();
        let mut clock = TransportClock::new(120.0, now);
        clock.start(now);

        let mid = now + Duration::from_secs(1); // beat 2.0
        let before = clock.current_beat(mid);
        clock.set_bpm(60.0, mid);
        let after = clock.current_beat(mid);

        assert!((before - after).abs() < 1e-9, "beat jumped on tempo change");

        // From here on, 60 bpm = 1 beat per second.
        let later = clock.current_beat(mid + Duration::from_secs(2));
        assert!((later - (before + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn skip_teleports_and_clamps() {
        let now = t0();
        let mut clock = TransportClock::new(120.0, now);

        clock.skip(4.0, now);
        assert_eq!(clock.current_beat(now), 4.0);

        clock.skip(-100.0, now);
        assert_eq!(clock.current_beat(now), 0.0);
    }

    #[test]
    fn stop_freezes_position() {
        let now = t0();
        let mut clock = TransportClock::new(120.0, now);
        clock.start(now);

        let mid = now + Duration::from_secs(1);
        clock.stop(mid);
        let frozen = clock.current_beat(mid + Duration::from_secs(10));
        assert!((frozen - 2.0).abs() < 1e-9);
    }
}
