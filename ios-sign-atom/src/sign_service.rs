// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Client for the remote signing service.

Signing happens in 3 steps. The signing request is first sent to the service,
which responds with an opaque token encoding it. The `.ipa` is then uploaded
with that token attached as a header, yielding a *resign id*. The resign id is
then polled until the service reports the job as finished.

All responses are wrapped in a `{status, message, data}` envelope, which is
modeled by [ServiceResponse].
*/

use {
    crate::{atom::SdkEnv, sign_info::IpaSignInfo, IosSignError},
    log::{debug, error, info},
    reqwest::{
        blocking::{Client, ClientBuilder, RequestBuilder},
        header::HeaderValue,
        Method,
    },
    serde::{de::DeserializeOwned, Deserialize},
    serde_json::Value,
    std::{fs::File, path::Path, time::Duration},
    url::Url,
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub const ENCODE_INFO_PATH: &str = "ms/sign/api/build/ipaSignInfo/base64Encode";
pub const SUBMIT_SIGN_PATH: &str = "ms/sign/api/build/ipa/sign";

/// Header carrying the encoded signing request during upload.
pub const SIGN_INFO_HEADER: &str = "X-DEVOPS-SIGN-INFO";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const IO_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on the whole `.ipa` upload.
///
/// reqwest only knows whole-request timeouts, which [IO_TIMEOUT] is too short for.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Obtain a default [Client] for talking to the signing service.
pub fn default_client() -> Result<Client, IosSignError> {
    Ok(ClientBuilder::new()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(IO_TIMEOUT)
        .build()?)
}

/// Response envelope shared by all signing service endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceResponse<T> {
    pub status: i64,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    /// Convert the envelope into its payload.
    ///
    /// A `status` of `0` is a failure reported by the service, regardless of the payload.
    pub fn into_data(self, path: &str) -> Result<T, IosSignError> {
        if self.status == 0 {
            return Err(IosSignError::RemoteFailure(
                path.to_string(),
                self.message.unwrap_or_default(),
            ));
        }

        self.data
            .ok_or_else(|| IosSignError::RemoteMissingData(path.to_string()))
    }
}

/// Make a string acceptable as an HTTP header value.
///
/// Newlines are dropped. Values still holding control or non-ASCII characters are
/// form URL encoded.
pub fn encode_header_value(value: &str) -> String {
    let value = value.replace('\n', "");

    if value.chars().any(|c| c <= '\u{1f}' || c >= '\u{7f}') {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    } else {
        value
    }
}

/// Remote operations offered by the signing service.
pub trait SignService {
    /// Obtain the opaque token encoding a signing request.
    fn encode_info(&self, info: &IpaSignInfo) -> Result<String, IosSignError>;

    /// Upload an `.ipa` for signing, returning the resign id of the job.
    fn submit_sign(&self, encoded_info: &str, ipa_path: &Path) -> Result<String, IosSignError>;

    /// Whether the job identified by `resign_id` has finished.
    fn sign_status(&self, resign_id: &str) -> Result<bool, IosSignError>;
}

/// HTTP client for the signing service behind the API gateway.
pub struct SignServiceClient {
    client: Client,
    base_url: Url,
    headers: Vec<(&'static str, String)>,
}

impl SignServiceClient {
    /// Construct an instance talking to the service at `base_url`.
    ///
    /// Paths are resolved relative to `base_url`, so it should end with `/`.
    pub fn new(client: Client, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            headers: vec![],
        }
    }

    /// Construct an instance using the gateway and agent identity of the build agent.
    pub fn from_sdk_env(client: Client, env: &SdkEnv) -> Result<Self, IosSignError> {
        let mut slf = Self::new(client, env.gateway_url()?);
        slf.headers = env.headers();

        Ok(slf)
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &'static str, value: impl ToString) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    /// URL of the status endpoint of a signing job.
    ///
    /// The resign id always lands in a single path segment.
    pub fn status_url(&self, resign_id: &str) -> Result<Url, IosSignError> {
        if matches!(resign_id, "" | "." | "..") {
            return Err(IosSignError::InvalidResignId(resign_id.to_string()));
        }

        let mut url = self.base_url.join(SUBMIT_SIGN_PATH)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(resign_id)
            .push("status");

        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, IosSignError> {
        let mut request = self.client.request(method, url);
        for (name, value) in &self.headers {
            request = request.header(*name, header_value(name, value)?);
        }

        Ok(request)
    }

    fn send_request<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<T, IosSignError> {
        let request = request.build()?;
        let url = request.url().to_string();

        debug!("{} {}", request.method(), url);

        let response = self.client.execute(request)?;
        let status = response.status();
        let body = response.bytes()?;

        if !status.is_success() {
            error!("HTTP error from {}", url);

            if let Ok(value) = serde_json::from_slice::<Value>(body.as_ref()) {
                for line in serde_json::to_string_pretty(&value)?.lines() {
                    error!("{}", line);
                }
            } else {
                error!("{}", String::from_utf8_lossy(body.as_ref()));
            }

            return Err(IosSignError::RemoteHttpStatus(path.to_string(), status));
        }

        let envelope = serde_json::from_slice::<ServiceResponse<T>>(body.as_ref())
            .map_err(|e| IosSignError::ResponseDecode(path.to_string(), e))?;

        envelope.into_data(path)
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, IosSignError> {
    HeaderValue::from_str(&encode_header_value(value))
        .map_err(|_| IosSignError::InvalidHeaderValue(name))
}

impl SignService for SignServiceClient {
    fn encode_info(&self, info: &IpaSignInfo) -> Result<String, IosSignError> {
        let request = self
            .request(Method::POST, self.base_url.join(ENCODE_INFO_PATH)?)?
            .header("Accept", "application/json")
            .json(info);

        self.send_request(request, ENCODE_INFO_PATH)
    }

    fn submit_sign(&self, encoded_info: &str, ipa_path: &Path) -> Result<String, IosSignError> {
        let fh = File::open(ipa_path)?;

        info!("uploading {} for signing", ipa_path.display());
        let request = self
            .request(Method::POST, self.base_url.join(SUBMIT_SIGN_PATH)?)?
            .header(SIGN_INFO_HEADER, header_value(SIGN_INFO_HEADER, encoded_info)?)
            .header("Accept", "application/json")
            .header("Content-Type", "application/octet-stream")
            .timeout(UPLOAD_TIMEOUT)
            .body(fh);

        self.send_request(request, SUBMIT_SIGN_PATH)
    }

    fn sign_status(&self, resign_id: &str) -> Result<bool, IosSignError> {
        let url = self.status_url(resign_id)?;
        let path = url.path().trim_start_matches('/').to_string();

        let request = self
            .request(Method::GET, url)?
            .header("Accept", "application/json");

        self.send_request(request, &path)
    }
}
