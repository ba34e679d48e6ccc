use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::*;

use crate::error::{TrexError, TrexResult};
use crate::utilities::{Countdown, Stopwatch};

/// Drives the servo tick at a fixed period. The callback runs on the
/// scheduler's own thread and single-threaded with respect to itself;
/// returning `false` stops the rearm loop.
pub trait PeriodicScheduler {
    fn arm(
        &mut self,
        initial: Duration,
        period: Duration,
        tick: Box<dyn FnMut() -> bool + Send>,
    ) -> TrexResult<()>;
    fn disarm(&mut self);
}

/// Dedicated high-priority-ish thread spinning on the monotonic clock.
#[derive(Default)]
pub struct ThreadScheduler {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeriodicScheduler for ThreadScheduler {
    fn arm(
        &mut self,
        initial: Duration,
        period: Duration,
        mut tick: Box<dyn FnMut() -> bool + Send>,
    ) -> TrexResult<()> {
        if self.handle.is_some() {
            return Err(TrexError::TimerMisuse("scheduler is already armed"));
        }
        let stop = Arc::clone(&self.stop);
        stop.store(false, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("servo-tick".to_owned())
            .spawn(move || {
                let mut stopwatch = Stopwatch::new();
                let mut overrun_log = Countdown::new(Duration::from_secs(1));
                thread::sleep(initial);
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    stopwatch.start("servo tick").expect("stopwatch misuse");
                    if !tick() {
                        debug!("Tick callback asked to stop");
                        break;
                    }
                    let elapsed = stopwatch.stop().expect("stopwatch misuse");
                    if elapsed >= period && overrun_log.check() {
                        warn!("Servo tick overran its period: {elapsed:?}");
                    }
                    thread::sleep(period.saturating_sub(elapsed));
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn disarm(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Servo tick thread panicked");
            }
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
