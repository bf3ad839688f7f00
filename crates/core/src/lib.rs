// SPDX-License-Identifier: MIT

//! Core job model for the launcher plugin.
//!
//! The canonical [`Job`] entity, its wire serialization, the per-job lock
//! ([`SharedJob`]), and the clock abstraction used by everything that
//! timestamps or schedules.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod clock;
mod config_value;
mod container;
mod job;
mod macros;
mod mount;
mod status;
mod user;

pub use clock::{timestamp, Clock, FakeClock, SystemClock};
pub use config_value::{ConfigValue, ConfigValueType};
pub use container::ContainerSpec;
pub use job::{
    shared, EnvVar, ExposedPort, Job, JobError, PlacementConstraint, ResourceLimit, SharedJob,
};
pub use mount::{
    AzureFileMountSource, CephFsMountSource, GlusterFsMountSource, HostMountSource, Mount,
    MountSource, NfsMountSource,
};
pub use status::{InvalidStatus, JobStatus};
pub use user::User;
