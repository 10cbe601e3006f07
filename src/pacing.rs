use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Cooperative cancellation flag shared between a session and whoever may stop it
/// (a Ctrl+C handler, a progress callback, a UI thread).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Sleeper {
    fn sleep_ms(&mut self, ms: u64);
}

#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Sleeper that never blocks; the pacer still accounts the requested time.
#[derive(Debug, Default)]
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep_ms(&mut self, _ms: u64) {}
}

/// Owns every wait the engine performs, so pacing is uniform and tests can run
/// without real time passing.
pub struct Pacer {
    sleeper: Box<dyn Sleeper>,
    rng: StdRng,
    elapsed_ms: u64,
}

impl Pacer {
    pub fn new(sleeper: Box<dyn Sleeper>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            sleeper,
            rng,
            elapsed_ms: 0,
        }
    }

    pub fn realtime(seed: Option<u64>) -> Self {
        Self::new(Box::new(ThreadSleeper), seed)
    }

    pub fn instant(seed: u64) -> Self {
        Self::new(Box::new(NoSleep), Some(seed))
    }

    /// Total time requested so far, in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn pause(&mut self, ms: u64) {
        if ms == 0 {
            return;
        }
        self.elapsed_ms = self.elapsed_ms.saturating_add(ms);
        self.sleeper.sleep_ms(ms);
    }

    /// `base ± jitter`, normally distributed around `base` and clamped to the band.
    pub fn jittered_delay_ms(&mut self, base: u64, jitter: u64) -> u64 {
        if jitter == 0 {
            return base;
        }
        let spread = jitter as f64;
        let offset = match Normal::new(0.0, spread / 2.0) {
            Ok(dist) => dist.sample(&mut self.rng).clamp(-spread, spread),
            Err(_) => 0.0,
        };
        (base as f64 + offset).round().max(0.0) as u64
    }

    pub fn keystroke_pause(&mut self, base: u64, jitter: u64) {
        let ms = self.jittered_delay_ms(base, jitter);
        self.pause(ms);
    }

    /// Sleep in 50 ms steps, returning early once `cancel` is set.
    /// Returns false if the wait was interrupted.
    pub fn pause_interruptible(&mut self, ms: u64, cancel: &CancelToken) -> bool {
        let mut remaining = ms;
        while remaining > 0 {
            if cancel.is_cancelled() {
                return false;
            }
            let step = remaining.min(50);
            self.pause(step);
            remaining -= step;
        }
        !cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("elapsed_ms", &self.elapsed_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_band() {
        let mut pacer = Pacer::instant(7);
        for _ in 0..500 {
            let ms = pacer.jittered_delay_ms(20, 5);
            assert!((15..=25).contains(&ms), "{ms} outside 20±5");
        }
    }

    #[test]
    fn jitter_is_not_uniform_cadence() {
        let mut pacer = Pacer::instant(11);
        let samples: Vec<u64> = (0..50).map(|_| pacer.jittered_delay_ms(20, 5)).collect();
        assert!(samples.iter().any(|&ms| ms != samples[0]));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let mut pacer = Pacer::instant(1);
        assert_eq!(pacer.jittered_delay_ms(30, 0), 30);
    }

    #[test]
    fn interruptible_pause_stops_when_cancelled() {
        let mut pacer = Pacer::instant(1);
        let cancel = CancelToken::new();
        assert!(pacer.pause_interruptible(120, &cancel));
        assert_eq!(pacer.elapsed_ms(), 120);

        cancel.cancel();
        assert!(!pacer.pause_interruptible(1000, &cancel));
        assert_eq!(pacer.elapsed_ms(), 120);
    }
}
