//! Timing and resource utilization.

mod profile;
mod utilization;

pub use profile::{Profile, Section, SectionTimes};
pub use utilization::{Utilization, UtilizationSnapshot};
