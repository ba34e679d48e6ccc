use std::time::{Duration, Instant};

use tracing::*;
use tracing_subscriber::EnvFilter;

use crate::error::{TrexError, TrexResult};

pub fn setup_tracing(verbosity_level: u8) {
    let filter = match verbosity_level {
        0 => tracing::level_filters::LevelFilter::INFO,
        1 => tracing::level_filters::LevelFilter::DEBUG,
        _ => tracing::level_filters::LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("unable to set global subscriber");
}

/// Simple tagged stopwatch for measuring sections of the servo tick.
#[derive(Debug, Default)]
pub struct Stopwatch {
    start_time: Option<Instant>,
    tag: &'static str,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, tag: &'static str) -> TrexResult<()> {
        if self.start_time.is_some() {
            return Err(TrexError::TimerMisuse(
                "timer is running, stop it before starting",
            ));
        }
        self.start_time = Some(Instant::now());
        self.tag = tag;
        Ok(())
    }

    pub fn stop(&mut self) -> TrexResult<Duration> {
        let start_time = self
            .start_time
            .take()
            .ok_or(TrexError::TimerMisuse("timer is not running"))?;
        let elapsed = start_time.elapsed();
        trace!("{} elapsed: {:?}", self.tag, elapsed);
        Ok(elapsed)
    }
}

/// Count-down timer that rearms itself whenever the interval has passed.
#[derive(Debug)]
pub struct Countdown {
    interval: Duration,
    last: Instant,
}

impl Countdown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    pub fn check(&mut self) -> bool {
        if self.last.elapsed() > self.interval {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_double_start_is_misuse() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start("first").unwrap();
        assert!(matches!(
            stopwatch.start("second"),
            Err(TrexError::TimerMisuse(_))
        ));
    }

    #[test]
    fn stopwatch_stop_without_start_is_misuse() {
        let mut stopwatch = Stopwatch::new();
        assert!(matches!(stopwatch.stop(), Err(TrexError::TimerMisuse(_))));
    }

    #[test]
    fn stopwatch_restarts_after_stop() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start("tick").unwrap();
        stopwatch.stop().unwrap();
        stopwatch.start("tick").unwrap();
        assert!(stopwatch.stop().is_ok());
    }

    #[test]
    fn countdown_rearms() {
        let mut countdown = Countdown::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(1));
        assert!(countdown.check());
    }
}
