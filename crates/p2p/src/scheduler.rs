//! Fixed-interval job table driven by the peer manager's schedule task.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PeriodicJob {
    CheckTimeout,
    BroadcastLocalAddress,
    SendAddresses,
    SendPing,
}

struct Entry {
    job: PeriodicJob,
    interval: Duration,
    next_run: Instant,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub(crate) fn add(&mut self, job: PeriodicJob, interval_secs: u64) {
        let interval = Duration::from_secs(interval_secs.max(1));
        self.entries.push(Entry {
            job,
            interval,
            next_run: Instant::now() + interval,
        });
    }

    /// Jobs whose interval has elapsed; each is rescheduled as it fires.
    pub(crate) fn due(&mut self, now: Instant) -> Vec<PeriodicJob> {
        let mut fired = Vec::new();
        for entry in &mut self.entries {
            if now >= entry.next_run {
                fired.push(entry.job);
                entry.next_run = now + entry.interval;
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_fire_on_schedule() {
        let mut scheduler = Scheduler::default();
        scheduler.add(PeriodicJob::SendPing, 1);
        scheduler.add(PeriodicJob::CheckTimeout, 3);

        let start = Instant::now();
        assert!(scheduler.due(start).is_empty());

        let fired = scheduler.due(start + Duration::from_secs(1));
        assert_eq!(fired, vec![PeriodicJob::SendPing]);

        let fired = scheduler.due(start + Duration::from_secs(3));
        assert!(fired.contains(&PeriodicJob::SendPing));
        assert!(fired.contains(&PeriodicJob::CheckTimeout));
    }
}
