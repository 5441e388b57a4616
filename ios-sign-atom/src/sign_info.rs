// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing request payload.

An [IpaSignInfo] describes everything the signing service needs to know to
re-sign an `.ipa`: which certificate and provisioning profiles to use, the
digest of the uploaded file, and where the signed result should be archived.
*/

use {
    crate::{validation::ValidatedParams, IosSignError},
    log::{info, warn},
    md5::Digest,
    serde::{Deserialize, Serialize},
    std::{fs::File, io::Read, path::Path},
};

/// Sensitive config key holding the in-house certificate id.
pub const INHOUSE_CERT_ID_KEY: &str = "INHOUSE_CERT_ID";

/// Sensitive config key holding the external certificate id.
pub const OUTHOUSE_CERT_ID_KEY: &str = "OUTHOUSE_CERT_ID";

/// Scenario type selecting the in-house certificate.
pub const SCENARIO_INNER: &str = "inner";

/// Identity reported to the signing service as the requesting user.
pub const SIGN_USER_ID: &str = env!("CARGO_PKG_NAME");

/// Whether wildcard signing is used.
///
/// Wildcard signing is not supported yet. Bundle identifiers are always replaced.
pub const WILDCARD_SIGNING: bool = false;

/// Where the signing service stores the signed package.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArchiveType {
    /// The pipeline's artifact repository.
    Pipeline,
    /// A user supplied custom path.
    Custom,
}

/// Signing identity of an application extension.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppexSignInfo {
    pub bundle_id: String,
    pub mobile_provision_id: String,
}

/// A request to sign an `.ipa`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IpaSignInfo {
    pub user_id: String,
    pub wildcard: bool,
    pub file_name: String,
    pub file_size: u64,
    /// Hex encoded MD5 of the file content.
    pub md5: String,
    pub cert_id: Option<String>,
    pub archive_type: ArchiveType,
    pub project_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub build_id: Option<String>,
    pub task_id: Option<String>,
    pub archive_path: Option<String>,
    pub mobile_provision_id: Option<String>,
    pub universal_links: Option<Vec<String>>,
    #[serde(rename = "keychaimAccessGroups")]
    pub keychain_access_groups: Option<Vec<String>>,
    pub replace_bundle_id: bool,
    pub appex_sign_info: Option<Vec<AppexSignInfo>>,
}

/// Compute the MD5 of a reader's content.
///
/// Returns the number of bytes read and the raw digest.
pub fn digest_md5<R: Read>(reader: &mut R) -> Result<(u64, Vec<u8>), IosSignError> {
    let mut hasher = md5::Md5::new();
    let mut size = 0;
    let mut buffer = [0u8; 16384];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }

        size += count as u64;
        hasher.update(&buffer[0..count]);
    }

    Ok((size, hasher.finalize().to_vec()))
}

/// Compute the hex encoded MD5 of a file along with its size.
pub fn file_md5_hex(path: &Path) -> Result<(u64, String), IosSignError> {
    let mut fh = File::open(path)?;
    let (size, digest) = digest_md5(&mut fh)?;

    Ok((size, hex::encode(digest)))
}

fn split_list(value: Option<&str>) -> Option<Vec<String>> {
    match value {
        Some(s) if !s.is_empty() => Some(s.split(';').map(|x| x.to_string()).collect()),
        _ => None,
    }
}

impl IpaSignInfo {
    /// Build the signing request for the `.ipa` at `ipa_path`.
    pub fn from_params(params: &ValidatedParams, ipa_path: &Path) -> Result<Self, IosSignError> {
        let param = params.param();

        if !ipa_path.exists() {
            return Err(IosSignError::FileNotFound(ipa_path.to_path_buf()));
        }

        let file_name = ipa_path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();
        let (file_size, md5) = file_md5_hex(ipa_path)?;

        let cert_key = if param.scenario_type.as_deref() == Some(SCENARIO_INNER) {
            INHOUSE_CERT_ID_KEY
        } else {
            OUTHOUSE_CERT_ID_KEY
        };
        let cert_id = param.base.sensitive_conf.get(cert_key).cloned();
        if cert_id.is_none() {
            warn!("no certificate configured under {}", cert_key);
        }

        let archive_type = if param.customize {
            ArchiveType::Custom
        } else {
            ArchiveType::Pipeline
        };

        let appex_sign_info = params.appex_params().and_then(|appex| {
            if appex.is_empty() {
                return None;
            }

            Some(
                appex
                    .iter()
                    .filter_map(|p| {
                        let kvs = p.values.as_ref()?;
                        let info = AppexSignInfo {
                            bundle_id: kvs.first()?.value.clone().unwrap_or_default(),
                            mobile_provision_id: kvs.get(1)?.value.clone().unwrap_or_default(),
                        };
                        info!(
                            "appex sign info: {} -> {}",
                            info.bundle_id, info.mobile_provision_id
                        );
                        Some(info)
                    })
                    .collect::<Vec<_>>(),
            )
        });

        Ok(Self {
            user_id: SIGN_USER_ID.to_string(),
            wildcard: WILDCARD_SIGNING,
            file_name,
            file_size,
            md5,
            cert_id,
            archive_type,
            project_id: param.base.project_name.clone(),
            pipeline_id: param.base.pipeline_id.clone(),
            build_id: param.base.pipeline_build_id.clone(),
            task_id: param.base.pipeline_task_id.clone(),
            archive_path: param.dest_path.clone(),
            mobile_provision_id: param.main_profile.clone(),
            universal_links: split_list(param.universal_links.as_deref()),
            keychain_access_groups: split_list(param.keychain_access_groups.as_deref()),
            replace_bundle_id: !WILDCARD_SIGNING,
            appex_sign_info,
        })
    }
}
