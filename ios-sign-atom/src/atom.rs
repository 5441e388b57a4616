// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Contract with the pipeline host.

The host runs the atom as a child process inside a data directory. Parameters
are read from a JSON file in that directory (`input.json` by default), agent
credentials and the API gateway come from `.sdk.json`, and the outcome of the
invocation must be written to `output.json` before the process exits.

File names can be overridden by the host through the `bk_data_dir`,
`bk_data_input` and `bk_data_output` environment variables.
*/

use {
    crate::IosSignError,
    log::{debug, error, info},
    serde::{de::DeserializeOwned, de::Error as _, Deserialize, Deserializer, Serialize},
    std::{
        collections::{BTreeMap, HashMap},
        path::{Path, PathBuf},
    },
    url::Url,
};

/// Environment variable holding the host data directory.
pub const DATA_DIR_ENV: &str = "bk_data_dir";

/// Environment variable holding the name of the input file.
pub const INPUT_FILE_ENV: &str = "bk_data_input";

/// Environment variable holding the name of the output file.
pub const OUTPUT_FILE_ENV: &str = "bk_data_output";

pub const DEFAULT_INPUT_FILE: &str = "input.json";
pub const DEFAULT_OUTPUT_FILE: &str = "output.json";

/// File in the data directory describing the build agent.
pub const SDK_ENV_FILE: &str = ".sdk.json";

pub const HEADER_BUILD_TYPE: &str = "X-DEVOPS-BUILD-TYPE";
pub const HEADER_PROJECT_ID: &str = "X-DEVOPS-PROJECT-ID";
pub const HEADER_AGENT_ID: &str = "X-DEVOPS-AGENT-ID";
pub const HEADER_AGENT_SECRET_KEY: &str = "X-DEVOPS-AGENT-SECRET-KEY";
pub const HEADER_BUILD_ID: &str = "X-DEVOPS-BUILD-ID";
pub const HEADER_VM_SEQ_ID: &str = "X-DEVOPS-VM-SEQ-ID";

/// Final state of an atom invocation as seen by the host.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Failure,
}

/// The record written to the output file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AtomResult {
    pub status: Status,
    pub message: String,
    #[serde(rename = "type")]
    pub typ: String,
    /// Output variables exported to later pipeline steps.
    pub data: BTreeMap<String, serde_json::Value>,
}

impl AtomResult {
    pub fn new(status: Status, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
            typ: "default".to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn success(message: impl ToString) -> Self {
        Self::new(Status::Success, message)
    }

    pub fn from_error(err: &IosSignError) -> Self {
        Self::new(err.status(), err)
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Parameters every atom receives from the host.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AtomBaseParam {
    /// Absolute path of the build workspace.
    #[serde(rename = "bkWorkspace")]
    pub workspace: String,

    #[serde(rename = "project.name", alias = "projectName")]
    pub project_name: Option<String>,

    #[serde(rename = "pipeline.id", alias = "pipelineId")]
    pub pipeline_id: Option<String>,

    #[serde(rename = "pipeline.build.id", alias = "pipelineBuildId")]
    pub pipeline_build_id: Option<String>,

    #[serde(rename = "pipeline.task.id", alias = "pipelineTaskId")]
    pub pipeline_task_id: Option<String>,

    /// Secrets configured for the atom by the platform administrators.
    #[serde(rename = "bkSensitiveConfInfo")]
    pub sensitive_conf: HashMap<String, String>,
}

/// Parameters of the iOS signing atom.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignAtomParam {
    #[serde(flatten)]
    pub base: AtomBaseParam,

    /// Path of the `.ipa` relative to the workspace.
    pub ipa_path: Option<String>,

    /// `inner` selects the in-house certificate. Anything else selects the external one.
    pub scenario_type: Option<String>,

    /// `single` disables extension signing.
    pub profile_type: Option<String>,

    pub app_id: Option<String>,

    /// Provisioning profile of the main application.
    pub main_profile: Option<String>,

    /// Archive the signed package to `dest_path` instead of the pipeline repository.
    #[serde(deserialize_with = "deserialize_flag")]
    pub customize: bool,

    pub dest_path: Option<String>,

    /// JSON encoded list of extension parameters.
    pub appex_list: Option<String>,

    /// `;` delimited universal links.
    pub universal_links: Option<String>,

    /// `;` delimited keychain access groups.
    #[serde(rename = "keychaimAccessGroups")]
    pub keychain_access_groups: Option<String>,

    #[serde(deserialize_with = "deserialize_optional_flag")]
    pub user_agree: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

// Form values frequently arrive as strings.
fn deserialize_optional_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match Option::<Flag>::deserialize(d)? {
        None => Ok(None),
        Some(Flag::Bool(v)) => Ok(Some(v)),
        Some(Flag::Text(s)) => match s.trim() {
            "true" => Ok(Some(true)),
            "false" | "" => Ok(Some(false)),
            other => Err(D::Error::custom(format!("invalid boolean: {}", other))),
        },
    }
}

fn deserialize_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(deserialize_optional_flag(d)?.unwrap_or(false))
}

/// Description of the build agent the atom runs on.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SdkEnv {
    pub build_type: String,
    pub project_id: String,
    pub agent_id: String,
    pub secret_key: String,
    /// Host (and optional port) of the API gateway.
    pub gateway: String,
    pub build_id: String,
    pub vm_seq_id: String,
}

impl SdkEnv {
    /// Resolve the base URL of the API gateway.
    ///
    /// The gateway is frequently given without a scheme, in which case plain HTTP is
    /// assumed. The returned URL always ends with `/` so relative paths join beneath it.
    pub fn gateway_url(&self) -> Result<Url, IosSignError> {
        let gateway = self.gateway.trim();

        let mut url = if gateway.starts_with("http://") || gateway.starts_with("https://") {
            Url::parse(gateway)?
        } else {
            Url::parse(&format!("http://{}", gateway))?
        };

        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }

        Ok(url)
    }

    /// Identity headers attached to every request to the gateway.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_BUILD_TYPE, self.build_type.clone()),
            (HEADER_PROJECT_ID, self.project_id.clone()),
            (HEADER_AGENT_ID, self.agent_id.clone()),
            (HEADER_AGENT_SECRET_KEY, self.secret_key.clone()),
            (HEADER_BUILD_ID, self.build_id.clone()),
            (HEADER_VM_SEQ_ID, self.vm_seq_id.clone()),
        ]
    }
}

/// Locations of the files exchanged with the host.
#[derive(Clone, Debug)]
pub struct AtomEnvironment {
    data_dir: PathBuf,
    input_file: String,
    output_file: String,
}

impl AtomEnvironment {
    pub fn new(
        data_dir: impl AsRef<Path>,
        input_file: impl ToString,
        output_file: impl ToString,
    ) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            input_file: input_file.to_string(),
            output_file: output_file.to_string(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn input_path(&self) -> PathBuf {
        self.data_dir.join(&self.input_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.data_dir.join(&self.output_file)
    }

    pub fn sdk_env_path(&self) -> PathBuf {
        self.data_dir.join(SDK_ENV_FILE)
    }

    /// Read and decode the atom parameters.
    pub fn read_param<T: DeserializeOwned>(&self) -> Result<T, IosSignError> {
        let path = self.input_path();
        debug!("reading atom input from {}", path.display());

        let data = std::fs::read(&path)
            .map_err(|e| IosSignError::AtomInput(path.clone(), e.to_string()))?;

        serde_json::from_slice(&data).map_err(|e| IosSignError::AtomInput(path, e.to_string()))
    }

    pub fn read_sdk_env(&self) -> Result<SdkEnv, IosSignError> {
        let path = self.sdk_env_path();
        debug!("reading SDK environment from {}", path.display());

        let data =
            std::fs::read(&path).map_err(|e| IosSignError::SdkEnv(path.clone(), e.to_string()))?;

        serde_json::from_slice(&data).map_err(|e| IosSignError::SdkEnv(path, e.to_string()))
    }

    /// Write the invocation result for the host to pick up.
    pub fn write_result(&self, result: &AtomResult) -> Result<(), IosSignError> {
        let path = self.output_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("writing {:?} result to {}", result.status, path.display());
        std::fs::write(&path, serde_json::to_vec(result)?)?;

        Ok(())
    }

    /// Record the outcome of an invocation, whatever it is.
    ///
    /// Errors are written as a result too and then returned. A failure to write the
    /// result of an error is logged and the original error wins.
    pub fn finish(&self, outcome: Result<AtomResult, IosSignError>) -> Result<(), IosSignError> {
        match outcome {
            Ok(result) => self.write_result(&result),
            Err(err) => {
                error!("{}", err);

                if let Err(write_err) = self.write_result(&AtomResult::from_error(&err)) {
                    error!(
                        "unable to write result to {}: {}",
                        self.output_path().display(),
                        write_err
                    );
                }

                Err(err)
            }
        }
    }
}
