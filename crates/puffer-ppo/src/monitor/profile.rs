//! Wall-clock accounting per training phase.

use std::time::{Duration, Instant};

/// Timed phases of one epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    /// Whole rollout collection
    Eval,
    /// Waiting on the vectorized environment
    Env,
    /// Policy inference during collection
    EvalForward,
    /// Buffer writes and stat bookkeeping during collection
    EvalMisc,
    /// Whole update
    Train,
    /// Policy evaluation on minibatches
    TrainForward,
    /// Backward pass and optimizer step
    Learn,
    /// Sorting, GAE and batch materialization
    TrainMisc,
}

impl Section {
    pub const ALL: [Section; 8] = [
        Section::Eval,
        Section::Env,
        Section::EvalForward,
        Section::EvalMisc,
        Section::Train,
        Section::TrainForward,
        Section::Learn,
        Section::TrainMisc,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Section::Eval => "eval",
            Section::Env => "env",
            Section::EvalForward => "eval_forward",
            Section::EvalMisc => "eval_misc",
            Section::Train => "train",
            Section::TrainForward => "train_forward",
            Section::Learn => "learn",
            Section::TrainMisc => "train_misc",
        }
    }
}

/// Accumulated seconds per section as of the last published update
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SectionTimes {
    times: [f64; 8],
}

impl SectionTimes {
    pub fn get(&self, section: Section) -> f64 {
        self.times[section.index()]
    }

    /// Seconds spent collecting plus training
    pub fn epoch_time(&self) -> f64 {
        self.get(Section::Eval) + self.get(Section::Train)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Section, f64)> + '_ {
        Section::ALL.iter().map(move |s| (*s, self.get(*s)))
    }
}

/// Throughput and timing tracker.
///
/// Time is accumulated continuously with [`Profile::add`]; the derived
/// figures (SPS, uptime, remaining, section totals) only change when
/// [`Profile::update`] decides a reporting tick is due.
#[derive(Debug)]
pub struct Profile {
    start: Instant,
    elapsed: [Duration; 8],
    prev_steps: u64,
    sps: f64,
    uptime: f64,
    remaining: f64,
    published: SectionTimes,
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

impl Profile {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: [Duration::ZERO; 8],
            prev_steps: 0,
            sps: 0.0,
            uptime: 0.0,
            remaining: 0.0,
            published: SectionTimes::default(),
        }
    }

    /// Accumulate time into a section
    pub fn add(&mut self, section: Section, dt: Duration) {
        self.elapsed[section.index()] += dt;
    }

    /// Running total for a section, independent of reporting ticks
    pub fn elapsed(&self, section: Section) -> Duration {
        self.elapsed[section.index()]
    }

    /// Refresh the derived figures if `interval_s` has passed since the
    /// last refresh. Always reports at global step 0.
    pub fn update(&mut self, global_step: u64, total_timesteps: u64, interval_s: f64) -> bool {
        self.update_at(global_step, total_timesteps, interval_s, Instant::now())
    }

    pub(crate) fn update_at(
        &mut self,
        global_step: u64,
        total_timesteps: u64,
        interval_s: f64,
        now: Instant,
    ) -> bool {
        if global_step == 0 {
            return true;
        }

        let uptime = now.duration_since(self.start).as_secs_f64();
        let dt = uptime - self.uptime;
        if dt < interval_s || dt <= 0.0 {
            return false;
        }

        self.sps = global_step.saturating_sub(self.prev_steps) as f64 / dt;
        self.prev_steps = global_step;
        self.uptime = uptime;
        self.remaining = if self.sps > 0.0 {
            total_timesteps.saturating_sub(global_step) as f64 / self.sps
        } else {
            0.0
        };

        for section in Section::ALL {
            self.published.times[section.index()] = self.elapsed[section.index()].as_secs_f64();
        }
        true
    }

    pub fn sps(&self) -> f64 {
        self.sps
    }

    pub fn uptime(&self) -> f64 {
        self.uptime
    }

    /// Estimated seconds until `total_timesteps`
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    pub fn times(&self) -> SectionTimes {
        self.published
    }
}
