// Domain models

mod device;
mod job;
mod status;

pub use device::{Device, SshConfig, WolConfig};
pub use job::{
    ContainerOp, IntervalUnit, Job, JobAction, Precondition, Recurrence, RunOutcome, RunRecord,
};
pub use status::{ContainerStatus, DeviceMetrics, StatusSnapshot, now_ms};
