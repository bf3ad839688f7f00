// SPDX-License-Identifier: MIT

//! Launcher plugin SDK.
//!
//! Everything between the framed wire protocol and a concrete job backend:
//! the launcher channel, the status-notification bus, the job repository
//! and pruner, the streaming subsystem, the plugin runtime, options, and
//! the user-profiles overlay. Backends plug in through [`JobSource`] and
//! [`RepositoryHooks`].

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod channel;
mod error;
mod notifier;
mod options;
mod plugin;
mod profiles;
mod pruner;
mod repository;
mod source;
mod streams;

pub use channel::{ChannelHandle, LauncherChannel, RequestHandler, ResponseSender};
pub use error::SourceError;
pub use notifier::{JobStatusNotifier, Subscription};
pub use options::{LogLevel, Options, OptionsError};
pub use plugin::{Plugin, API_VERSION};
pub use profiles::{GroupResolver, OsGroupResolver, ProfilesError, UserProfiles};
pub use pruner::JobPruner;
pub use repository::{JobRepository, NullHooks, RepositoryHooks, WeakRepository};
pub use source::{ControlOutcome, JobSource, OutputCallbacks, OutputStream};
pub use streams::StreamManager;
