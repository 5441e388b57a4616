// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validation of atom parameters.

use {
    crate::{atom::SignAtomParam, IosSignError},
    log::info,
    serde::{Deserialize, Serialize},
};

/// Profile type under which extension parameters are ignored.
pub const PROFILE_TYPE_SINGLE: &str = "single";

/// A single key/value pair of an extension parameter row.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppexKeyValue {
    #[serde(default, alias = "id")]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Raw parameters for one application extension, as submitted by the host.
///
/// The first value is the extension bundle identifier and the second value is the
/// provisioning profile to sign it with.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppexParam {
    #[serde(default)]
    pub values: Option<Vec<AppexKeyValue>>,
}

/// Atom parameters that passed validation.
///
/// This is the only input accepted when building a signing request.
#[derive(Clone, Debug)]
pub struct ValidatedParams {
    param: SignAtomParam,
    appex_params: Option<Vec<AppexParam>>,
}

impl ValidatedParams {
    pub fn param(&self) -> &SignAtomParam {
        &self.param
    }

    /// Extension parameters, if any were supplied and are relevant for the profile type.
    pub fn appex_params(&self) -> Option<&[AppexParam]> {
        self.appex_params.as_deref()
    }
}

fn parse_appex_list(param: &SignAtomParam) -> Result<Option<Vec<AppexParam>>, IosSignError> {
    if param.profile_type.as_deref() == Some(PROFILE_TYPE_SINGLE) {
        return Ok(None);
    }

    match param.appex_list.as_deref() {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
            .map(Some)
            .map_err(IosSignError::AppexListParse),
        _ => Ok(None),
    }
}

/// Validate raw atom parameters.
///
/// Extension entries are checked in order and validation stops at the first
/// malformed entry.
pub fn validate(param: SignAtomParam) -> Result<ValidatedParams, IosSignError> {
    info!(
        "profile type: {}",
        param.profile_type.as_deref().unwrap_or("<none>")
    );

    if param.user_agree != Some(true) {
        return Err(IosSignError::UserAgreementRequired);
    }

    let appex_params = parse_appex_list(&param)?;

    for appex in appex_params.iter().flatten() {
        let kvs = match &appex.values {
            Some(kvs) if kvs.len() >= 2 => kvs,
            _ => return Err(IosSignError::AppexInfoIncomplete),
        };

        for kv in kvs {
            info!(
                "kv: {}={}",
                kv.key.as_deref().unwrap_or(""),
                kv.value.as_deref().unwrap_or("")
            );

            if kv.value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(IosSignError::AppexInfoBlank);
            }
        }
    }

    Ok(ValidatedParams {
        param,
        appex_params,
    })
}
