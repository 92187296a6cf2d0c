//! Scheduling support for Roost: cron parsing with a frequency floor,
//! system-state detection, and state-aware action gating.

pub mod cron;
pub mod priority;
pub mod system_state;

pub use cron::{CronSchedule, validate_schedule_frequency};
pub use priority::{ActionCategory, ActionDecision, category_for_action, evaluate_action};
pub use system_state::{
    CiStatusProbe, DiskPressureProbe, P0IssueProbe, ServerHealthProbe, SignalProbe, SystemState,
    SystemStateDetector, SystemStateResult,
};
