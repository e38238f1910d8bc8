pub mod polling;
pub mod scheduler;

pub use polling::PollingHandle;
pub use scheduler::{
    AdmissionOutcome, AdmissionReport, CycleOutcome, CycleReport, MarketSyncScheduler,
    MarketSyncSchedulerBuilder, SchedulerSettings,
};
