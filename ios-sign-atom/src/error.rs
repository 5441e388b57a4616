// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {crate::atom::Status, std::path::PathBuf, thiserror::Error};

/// Unified error type for the signing atom.
#[derive(Debug, Error)]
pub enum IosSignError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument: {0}")]
    CliBadArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("error reading atom input {0}: {1}")]
    AtomInput(PathBuf, String),

    #[error("error reading SDK environment {0}: {1}")]
    SdkEnv(PathBuf, String),

    #[error("user agreement must be accepted")]
    UserAgreementRequired,

    /// The raw extension list could not be parsed as JSON.
    ///
    /// Only the parser message is rendered, since it is reported to the host verbatim.
    #[error("{0}")]
    AppexListParse(serde_json::Error),

    #[error("appex info input with error")]
    AppexInfoIncomplete,

    #[error("appex info cannot be blank")]
    AppexInfoBlank,

    #[error("{} resign failed.", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("{} file not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid header value for {0}")]
    InvalidHeaderValue(&'static str),

    #[error("signing service request failed: path={0}, message: {1}")]
    RemoteFailure(String, String),

    #[error("signing service returned HTTP {1} for {0}")]
    RemoteHttpStatus(String, reqwest::StatusCode),

    #[error("signing service response for {0} has no data")]
    RemoteMissingData(String),

    #[error("invalid resign id: {0:?}")]
    InvalidResignId(String),

    #[error("Load sign response with error: {1}")]
    ResponseDecode(String, serde_json::Error),

    #[error("Status request with error: {0}")]
    Interrupted(String),

    #[error("Sign task timeout for {0} mins")]
    SignTaskTimeout(u64),
}

impl IosSignError {
    /// The result status reported to the host when an invocation ends with this error.
    ///
    /// Input problems detected while reading parameters are `failure`. Everything that
    /// happens once parameters are accepted is `error`.
    pub fn status(&self) -> Status {
        match self {
            Self::UserAgreementRequired
            | Self::AppexListParse(_)
            | Self::AppexInfoBlank
            | Self::AtomInput(_, _)
            | Self::SdkEnv(_, _)
            | Self::CliUnknownCommand
            | Self::CliBadArgument(_)
            | Self::ArtifactNotFound(_)
            | Self::FileNotFound(_) => Status::Failure,
            _ => Status::Error,
        }
    }

    /// Whether this error aborts the run instead of being reported as a result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound(_)
                | Self::FileNotFound(_)
                | Self::AtomInput(_, _)
                | Self::SdkEnv(_, _)
                | Self::CliUnknownCommand
                | Self::CliBadArgument(_)
        )
    }
}
