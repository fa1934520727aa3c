use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::*;

/// Fixed period loop timing with a startup barrier shared between loops.
#[derive(Debug)]
pub struct PeriodicScheduler {
    name: &'static str,
    period: Duration,
    barrier: Instant,
    cycle_start: Option<Instant>,
    last_dt: f32,
    overruns: u64,
    cycles: u64,
}

impl PeriodicScheduler {
    pub fn new(name: &'static str, period: Duration, barrier: Instant) -> Self {
        Self {
            name,
            period,
            barrier,
            cycle_start: None,
            last_dt: 0.0,
            overruns: 0,
            cycles: 0,
        }
    }

    pub async fn wait_for_start(&self) {
        sleep_until(self.barrier).await;
        info!("{} loop starting with period {:?}", self.name, self.period);
    }

    /// Mark the start of an iteration and return the duration of the previous
    /// one in seconds. Zero on the first iteration.
    pub fn begin(&mut self) -> f32 {
        let now = Instant::now();
        if let Some(previous) = self.cycle_start.replace(now) {
            self.last_dt = (now - previous).as_secs_f32();
        }
        self.last_dt
    }

    /// Sleep out the rest of the period, or report an overrun.
    pub async fn end(&mut self) {
        self.cycles += 1;
        let start = *self.cycle_start.get_or_insert_with(Instant::now);
        let work = start.elapsed();
        match self.period.checked_sub(work) {
            Some(_) => sleep_until(start + self.period).await,
            None => {
                self.overruns += 1;
                warn!(
                    "{} loop overran by {:.06} s ({} overruns)",
                    self.name,
                    (work - self.period).as_secs_f64(),
                    self.overruns
                );
            }
        }
    }

    pub fn last_dt(&self) -> f32 {
        self.last_dt
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[tokio::test(start_paused = true)]
    async fn waits_for_barrier() {
        let start = Instant::now();
        let barrier = start + Duration::from_secs(5);
        let scheduler = PeriodicScheduler::new("test", Duration::from_millis(100), barrier);
        scheduler.wait_for_start().await;
        assert!(Instant::now() >= barrier);
    }

    #[tokio::test(start_paused = true)]
    async fn dt_is_previous_iteration_duration() {
        let mut scheduler =
            PeriodicScheduler::new("test", Duration::from_millis(100), Instant::now());
        scheduler.wait_for_start().await;
        assert_eq!(scheduler.begin(), 0.0);
        scheduler.end().await;
        let dt = scheduler.begin();
        assert_relative_eq!(dt, 0.1, epsilon = 1e-3);
        scheduler.end().await;
        assert_eq!(scheduler.overruns(), 0);
        assert_eq!(scheduler.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_skips_sleep() {
        let mut scheduler =
            PeriodicScheduler::new("test", Duration::from_millis(100), Instant::now());
        scheduler.begin();
        tokio::time::advance(Duration::from_millis(250)).await;
        scheduler.end().await;
        assert_eq!(scheduler.overruns(), 1);
        let dt = scheduler.begin();
        assert_relative_eq!(dt, 0.25, epsilon = 1e-3);
    }
}
