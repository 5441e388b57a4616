// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline atom for signing iOS applications with a remote signing service.
//!
//! The atom is launched by a pipeline host once per pipeline step. It reads its
//! parameters from the host data directory, computes the digest of the `.ipa`
//! to sign, asks the signing service to sign it and then waits for the signing
//! job to finish. The outcome is written back to the data directory for the
//! host to report.
//!
//! # Getting Started
//!
//! [IosSignTask] is the entry point tying everything together. It is given a
//! [SignService] (usually a [SignServiceClient]) and a [SignTaskPoller] bounding
//! how long to wait on the signing job.
//!
//! The host side of things (parameter and result files, agent identity) lives
//! in the [atom] module.
//!
//! Signing requests are described by [IpaSignInfo], which can only be built
//! from parameters that passed [validate()].

pub mod atom;
pub use atom::{AtomEnvironment, AtomResult, SdkEnv, SignAtomParam, Status};
mod error;
pub use error::*;
pub mod polling;
pub use polling::{PollSettings, PollState, SignTaskPoller, Sleeper, ThreadSleeper};
pub mod sign_info;
pub use sign_info::{AppexSignInfo, ArchiveType, IpaSignInfo};
pub mod sign_service;
pub use sign_service::{default_client, ServiceResponse, SignService, SignServiceClient};
mod task;
pub use task::*;
pub mod validation;
pub use validation::{validate, AppexParam, ValidatedParams};
