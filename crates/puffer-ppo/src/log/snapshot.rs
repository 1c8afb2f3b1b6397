//! Immutable per-tick metrics and the dashboard rendered from them.

use crate::monitor::{Section, SectionTimes, UtilizationSnapshot};
use crate::training::Losses;
use crate::utils::{abbreviate, format_duration};
use std::collections::BTreeMap;
use std::fmt;

/// Everything a sink needs for one reporting tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub env_name: String,
    pub num_agents: usize,
    pub global_step: u64,
    pub epoch: u64,
    pub learning_rate: f64,
    pub sps: f64,
    pub uptime: f64,
    pub remaining: f64,
    pub times: SectionTimes,
    pub utilization: UtilizationSnapshot,
    pub losses: Losses,
    /// Reduced environment statistics from the last rollout
    pub stats: BTreeMap<String, f64>,
    pub message: String,
}

impl MetricsSnapshot {
    /// Flatten into namespaced scalar keys
    pub fn scalars(&self) -> Vec<(String, f64)> {
        let mut out = vec![
            ("overview/SPS".to_string(), self.sps),
            ("overview/agent_steps".to_string(), self.global_step as f64),
            ("overview/epoch".to_string(), self.epoch as f64),
            ("overview/learning_rate".to_string(), self.learning_rate),
        ];
        out.extend(self.stats.iter().map(|(k, v)| (format!("environment/{}", k), *v)));
        out.extend(self.losses.iter().map(|(k, v)| (format!("losses/{}", k), v)));
        out.push(("performance/SPS".to_string(), self.sps));
        out.push(("performance/uptime".to_string(), self.uptime));
        out.push(("performance/remaining".to_string(), self.remaining));
        out.extend(
            self.times
                .iter()
                .map(|(section, t)| (format!("performance/{}_time", section.name()), t)),
        );
        out
    }

    fn summary_rows(&self) -> Vec<(String, String)> {
        vec![
            ("Environment".into(), self.env_name.clone()),
            ("Agent Steps".into(), abbreviate(self.global_step as f64)),
            ("SPS".into(), abbreviate(self.sps)),
            ("Epoch".into(), abbreviate(self.epoch as f64)),
            ("Uptime".into(), format_duration(self.uptime)),
            ("Remaining".into(), format_duration(self.remaining)),
            ("Num agents".into(), self.num_agents.to_string()),
        ]
    }

    fn performance_rows(&self) -> Vec<(String, String, String)> {
        [
            ("Evaluate", Section::Eval),
            ("  Forward", Section::EvalForward),
            ("  Env", Section::Env),
            ("  Misc", Section::EvalMisc),
            ("Train", Section::Train),
            ("  Forward", Section::TrainForward),
            ("  Learn", Section::Learn),
            ("  Misc", Section::TrainMisc),
        ]
        .into_iter()
        .map(|(label, section)| {
            let t = self.times.get(section);
            let percent = if self.uptime > 0.0 {
                (100.0 * t / self.uptime - 1e-5).max(0.0) as u64
            } else {
                0
            };
            (label.to_string(), format_duration(t), format!("{}%", percent))
        })
        .collect()
    }
}

const RULE: &str =
    "──────────────────────────────────────────────────────────────────────────────────────────";

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = &self.utilization;
        writeln!(f, "╭{}", RULE)?;
        writeln!(
            f,
            "│ puffer-ppo {:<18} CPU: {:>5.1}%   GPU: {:>5.1}%   DRAM: {:>5.1}%   VRAM: {:>5.1}%",
            crate::VERSION,
            u.cpu_util,
            u.gpu_util,
            u.cpu_mem,
            u.gpu_mem
        )?;
        writeln!(f, "├{}", RULE)?;

        let summary = self.summary_rows();
        let perf = self.performance_rows();
        let losses: Vec<_> = self.losses.iter().collect();
        writeln!(
            f,
            "│ {:<14}{:>12}   {:<12}{:>10}{:>5}   {:<20}{:>10}",
            "Summary", "Value", "Performance", "Time", "%", "Losses", "Value"
        )?;
        let rows = summary.len().max(perf.len()).max(losses.len());
        for i in 0..rows {
            let (sk, sv) = summary.get(i).cloned().unwrap_or_default();
            let (pk, pt, pp) = perf.get(i).cloned().unwrap_or_default();
            let (lk, lv) = match losses.get(i) {
                Some((k, v)) => (k.to_string(), format!("{:.3}", v)),
                None => (String::new(), String::new()),
            };
            writeln!(
                f,
                "│ {:<14}{:>12}   {:<12}{:>10}{:>5}   {:<20}{:>10}",
                sk, sv, pk, pt, pp, lk, lv
            )?;
        }

        writeln!(f, "├{}", RULE)?;
        writeln!(
            f,
            "│ {:<30}{:>12}   {:<30}{:>12}",
            "User Stats", "Value", "User Stats", "Value"
        )?;
        let stats: Vec<_> = self.stats.iter().collect();
        for pair in stats.chunks(2) {
            let (lk, lv) = pair[0];
            match pair.get(1) {
                Some((rk, rv)) => writeln!(f, "│ {:<30}{:>12.3}   {:<30}{:>12.3}", lk, lv, rk, rv)?,
                None => writeln!(f, "│ {:<30}{:>12.3}", lk, lv)?,
            }
        }

        writeln!(f, "├{}", RULE)?;
        writeln!(f, "│ Message: {}", self.message)?;
        write!(f, "╰{}", RULE)
    }
}
