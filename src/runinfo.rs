/*!
Counters and timers describing one chain generation.

Two [`RunInfo`] values combine additively, so the host can sum the records of
independent replicas into a single report.
*/

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::time::Instant;

/// Accounting record of a chain generation. Times are in seconds; the phase
/// timers stay zero unless run-time measurement was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunInfo {
    pub run_time: f64,
    pub candidate_time: f64,
    pub target_time: f64,
    pub mh_alpha_time: f64,
    pub dr_alpha_time: f64,
    pub dr_time: f64,
    pub am_time: f64,

    pub num_target_calls: u64,
    pub num_drs: u64,
    pub num_out_of_support: u64,
    pub num_out_of_support_in_dr: u64,
    pub num_rejections: u64,
    pub num_non_finite_targets: u64,
}

impl RunInfo {
    pub fn reset(&mut self) {
        *self = RunInfo::default();
    }

    /// Multi-line summary of the run, with phase times relative to the total
    /// and rates relative to the chain size.
    pub fn report(&self, chain_size: usize) -> String {
        let pct = |t: f64| {
            if self.run_time > 0.0 {
                100.0 * t / self.run_time
            } else {
                0.0
            }
        };
        let n = chain_size.max(1) as f64;
        let mut out = String::new();
        out.push_str(&format!("chain run time       = {:.6} s\n", self.run_time));
        out.push_str(&format!(
            "  candidate time     = {:.6} s ({:.1}%)\n",
            self.candidate_time,
            pct(self.candidate_time)
        ));
        out.push_str(&format!(
            "  target time        = {:.6} s ({:.1}%), {} calls\n",
            self.target_time,
            pct(self.target_time),
            self.num_target_calls
        ));
        out.push_str(&format!(
            "  mh alpha time      = {:.6} s ({:.1}%)\n",
            self.mh_alpha_time,
            pct(self.mh_alpha_time)
        ));
        out.push_str(&format!(
            "  dr alpha time      = {:.6} s ({:.1}%)\n",
            self.dr_alpha_time,
            pct(self.dr_alpha_time)
        ));
        out.push_str(&format!(
            "  dr time            = {:.6} s ({:.1}%)\n",
            self.dr_time,
            pct(self.dr_time)
        ));
        out.push_str(&format!(
            "  am time            = {:.6} s ({:.1}%)\n",
            self.am_time,
            pct(self.am_time)
        ));
        out.push_str(&format!(
            "num DR stages        = {} ({:.3} per position)\n",
            self.num_drs,
            self.num_drs as f64 / n
        ));
        out.push_str(&format!(
            "rejection rate       = {:.1}%\n",
            100.0 * self.num_rejections as f64 / n
        ));
        out.push_str(&format!(
            "out of support       = {} (+{} in DR)\n",
            self.num_out_of_support, self.num_out_of_support_in_dr
        ));
        out.push_str(&format!(
            "non-finite targets   = {}\n",
            self.num_non_finite_targets
        ));
        out
    }
}

impl Add for RunInfo {
    type Output = RunInfo;

    fn add(mut self, rhs: RunInfo) -> RunInfo {
        self += rhs;
        self
    }
}

impl AddAssign for RunInfo {
    fn add_assign(&mut self, rhs: RunInfo) {
        self.run_time += rhs.run_time;
        self.candidate_time += rhs.candidate_time;
        self.target_time += rhs.target_time;
        self.mh_alpha_time += rhs.mh_alpha_time;
        self.dr_alpha_time += rhs.dr_alpha_time;
        self.dr_time += rhs.dr_time;
        self.am_time += rhs.am_time;
        self.num_target_calls += rhs.num_target_calls;
        self.num_drs += rhs.num_drs;
        self.num_out_of_support += rhs.num_out_of_support;
        self.num_out_of_support_in_dr += rhs.num_out_of_support_in_dr;
        self.num_rejections += rhs.num_rejections;
        self.num_non_finite_targets += rhs.num_non_finite_targets;
    }
}

impl Sum for RunInfo {
    fn sum<I: Iterator<Item = RunInfo>>(iter: I) -> RunInfo {
        iter.fold(RunInfo::default(), Add::add)
    }
}

impl fmt::Display for RunInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_time={:.6}s target_calls={} drs={} rejections={} oos={}+{} non_finite={}",
            self.run_time,
            self.num_target_calls,
            self.num_drs,
            self.num_rejections,
            self.num_out_of_support,
            self.num_out_of_support_in_dr,
            self.num_non_finite_targets
        )
    }
}

/// Phase timer. Disabled stopwatches report zero elapsed time, so call sites
/// can accumulate unconditionally.
#[derive(Debug)]
pub(crate) struct Stopwatch {
    started: Option<Instant>,
}

impl Stopwatch {
    pub(crate) fn start(enabled: bool) -> Self {
        Self {
            started: enabled.then(Instant::now),
        }
    }

    pub(crate) fn elapsed(&self) -> f64 {
        match self.started {
            Some(t) => t.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seed: u64) -> RunInfo {
        RunInfo {
            run_time: seed as f64 * 0.5,
            candidate_time: seed as f64 * 0.125,
            target_time: seed as f64 * 0.25,
            mh_alpha_time: 0.0,
            dr_alpha_time: seed as f64,
            dr_time: 0.0,
            am_time: 0.0,
            num_target_calls: seed,
            num_drs: seed * 2,
            num_out_of_support: seed / 2,
            num_out_of_support_in_dr: seed / 4,
            num_rejections: seed * 3,
            num_non_finite_targets: seed / 8,
        }
    }

    #[test]
    fn addition_is_fieldwise() {
        let a = sample(8);
        let b = sample(16);
        let c = a + b;
        assert_eq!(c.num_target_calls, 24);
        assert_eq!(c.num_rejections, 72);
        assert_eq!(c.run_time, 12.0);
    }

    #[test]
    fn addition_is_associative_with_identity() {
        let (a, b, c) = (sample(8), sample(16), sample(32));
        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(a + RunInfo::default(), a);
    }

    #[test]
    fn sum_of_replicas() {
        let total: RunInfo = vec![sample(8), sample(16), sample(32)].into_iter().sum();
        assert_eq!(total.num_target_calls, 56);
    }

    #[test]
    fn disabled_stopwatch_reports_zero() {
        let sw = Stopwatch::start(false);
        assert_eq!(sw.elapsed(), 0.0);
        let sw = Stopwatch::start(true);
        assert!(sw.elapsed() >= 0.0);
    }
}
