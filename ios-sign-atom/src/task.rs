// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution of the signing atom.

use {
    crate::{
        atom::{AtomResult, SignAtomParam},
        polling::{Sleeper, SignTaskPoller, ThreadSleeper},
        sign_info::IpaSignInfo,
        sign_service::SignService,
        validation::validate,
        IosSignError,
    },
    log::{debug, error, info, warn},
    std::path::PathBuf,
};

/// Message reported when signing completed.
pub const SUCCESS_MESSAGE: &str = "Sign is finished, please check Artifacts";

/// Signs an `.ipa` through a [SignService].
pub struct IosSignTask<'a, S: SignService, P: Sleeper = ThreadSleeper> {
    service: &'a S,
    poller: SignTaskPoller<P>,
}

impl<'a, S: SignService, P: Sleeper> IosSignTask<'a, S, P> {
    pub fn new(service: &'a S, poller: SignTaskPoller<P>) -> Self {
        Self { service, poller }
    }

    /// Run the atom for the given parameters.
    ///
    /// Problems with the parameters or the signing job are reported through the
    /// returned [AtomResult]. `Err` is only returned for fatal conditions, like the
    /// `.ipa` not existing.
    pub fn execute(&self, param: SignAtomParam) -> Result<AtomResult, IosSignError> {
        let params = match validate(param) {
            Ok(params) => params,
            Err(err) => {
                error!("params error: {}", err);
                return Ok(AtomResult::from_error(&err));
            }
        };

        let param = params.param();
        let ipa_path = PathBuf::from(&param.base.workspace)
            .join(param.ipa_path.as_deref().unwrap_or_default());

        if !ipa_path.is_file() {
            return Err(IosSignError::ArtifactNotFound(ipa_path));
        }

        let info = IpaSignInfo::from_params(&params, &ipa_path)?;
        info!(
            "signing {} ({} bytes, md5 {})",
            info.file_name, info.file_size, info.md5
        );

        match self.sign(&info, &ipa_path) {
            Ok(()) => Ok(AtomResult::success(SUCCESS_MESSAGE)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!("{}", err);
                Ok(AtomResult::from_error(&err))
            }
        }
    }

    fn sign(&self, info: &IpaSignInfo, ipa_path: &std::path::Path) -> Result<(), IosSignError> {
        let encoded = self.service.encode_info(info)?;
        debug!("encoded sign info: {}", encoded);

        let resign_id = self.service.submit_sign(&encoded, ipa_path)?;
        warn!("sign task submitted: {}", resign_id);

        self.poller.wait(self.service, &resign_id)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            atom::{AtomEnvironment, Status},
            polling::PollSettings,
            sign_info::{INHOUSE_CERT_ID_KEY, SIGN_USER_ID},
        },
        std::{cell::RefCell, path::Path, time::Duration},
    };

    #[derive(Default)]
    struct RecordingService {
        calls: RefCell<Vec<String>>,
        infos: RefCell<Vec<IpaSignInfo>>,
        finished_after: u64,
        fail_submit: bool,
    }

    impl SignService for RecordingService {
        fn encode_info(&self, info: &IpaSignInfo) -> Result<String, IosSignError> {
            self.calls.borrow_mut().push("encode".into());
            self.infos.borrow_mut().push(info.clone());
            Ok("token".into())
        }

        fn submit_sign(&self, encoded_info: &str, ipa_path: &Path) -> Result<String, IosSignError> {
            self.calls
                .borrow_mut()
                .push(format!("submit {} {}", encoded_info, ipa_path.display()));

            if self.fail_submit {
                Err(IosSignError::RemoteFailure(
                    "ms/sign/api/build/ipa/sign".into(),
                    "quota exceeded".into(),
                ))
            } else {
                Ok("resign-1".into())
            }
        }

        fn sign_status(&self, resign_id: &str) -> Result<bool, IosSignError> {
            let mut calls = self.calls.borrow_mut();
            calls.push(format!("status {}", resign_id));

            let polls = calls.iter().filter(|c| c.starts_with("status")).count() as u64;
            Ok(polls >= self.finished_after)
        }
    }

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) -> Result<(), IosSignError> {
            Ok(())
        }
    }

    fn poller() -> SignTaskPoller<NoSleep> {
        SignTaskPoller::with_sleeper(PollSettings::default(), NoSleep)
    }

    fn workspace_param(workspace: &Path) -> SignAtomParam {
        let mut param = SignAtomParam {
            user_agree: Some(true),
            ipa_path: Some("build/App.ipa".into()),
            scenario_type: Some("inner".into()),
            ..Default::default()
        };
        param.base.workspace = workspace.display().to_string();
        param
            .base
            .sensitive_conf
            .insert(INHOUSE_CERT_ID_KEY.into(), "cert-A".into());

        param
    }

    fn write_ipa(workspace: &Path) {
        std::fs::create_dir_all(workspace.join("build")).unwrap();
        std::fs::write(workspace.join("build").join("App.ipa"), b"payload").unwrap();
    }

    #[test]
    fn signs_and_waits() -> Result<(), IosSignError> {
        let temp_dir = tempfile::tempdir()?;
        write_ipa(temp_dir.path());

        let service = RecordingService {
            finished_after: 3,
            ..Default::default()
        };
        let task = IosSignTask::new(&service, poller());

        let result = task.execute(workspace_param(temp_dir.path()))?;
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.message, SUCCESS_MESSAGE);

        let calls = service.calls.borrow();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], "encode");
        assert!(calls[1].starts_with("submit token "));
        assert!(calls[1].ends_with("App.ipa"));
        assert_eq!(calls[4], "status resign-1");

        let info = &service.infos.borrow()[0];
        assert_eq!(info.user_id, SIGN_USER_ID);
        assert_eq!(info.cert_id.as_deref(), Some("cert-A"));
        assert_eq!(info.file_size, 7);

        Ok(())
    }

    #[test]
    fn invalid_params_skip_service() -> Result<(), IosSignError> {
        let temp_dir = tempfile::tempdir()?;
        write_ipa(temp_dir.path());

        let service = RecordingService::default();
        let task = IosSignTask::new(&service, poller());

        let mut param = workspace_param(temp_dir.path());
        param.user_agree = None;
        let result = task.execute(param)?;
        assert_eq!(result.status, Status::Failure);

        let mut param = workspace_param(temp_dir.path());
        param.appex_list = Some(r#"[{"values": [{"key": "bundleId", "value": "x"}]}]"#.into());
        let result = task.execute(param)?;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.message, "appex info input with error");

        assert!(service.calls.borrow().is_empty());

        Ok(())
    }

    #[test]
    fn missing_ipa_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();

        let service = RecordingService::default();
        let task = IosSignTask::new(&service, poller());

        let err = task
            .execute(workspace_param(temp_dir.path()))
            .unwrap_err();
        assert!(matches!(err, IosSignError::ArtifactNotFound(_)));
        assert!(err.to_string().ends_with("App.ipa resign failed."));
        assert!(service.calls.borrow().is_empty());
    }

    #[test]
    fn missing_ipa_reported_before_digest() -> Result<(), IosSignError> {
        let temp_dir = tempfile::tempdir()?;
        let env = AtomEnvironment::new(temp_dir.path(), "input.json", "output.json");

        let service = RecordingService::default();
        let task = IosSignTask::new(&service, poller());

        let outcome = task.execute(workspace_param(&temp_dir.path().join("ws")));
        assert!(env.finish(outcome).is_err());

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(env.output_path())?)?;
        assert_eq!(written["status"], "failure");

        let message = written["message"].as_str().unwrap_or_default();
        let expected = temp_dir.path().join("ws").join("build").join("App.ipa");
        assert_eq!(message, format!("{} resign failed.", expected.display()));
        assert!(!message.contains("file not found"));

        Ok(())
    }

    #[test]
    fn remote_failure_reported_as_error() -> Result<(), IosSignError> {
        let temp_dir = tempfile::tempdir()?;
        write_ipa(temp_dir.path());

        let service = RecordingService {
            fail_submit: true,
            ..Default::default()
        };
        let task = IosSignTask::new(&service, poller());

        let result = task.execute(workspace_param(temp_dir.path()))?;
        assert_eq!(result.status, Status::Error);
        assert!(result.message.contains("quota exceeded"));
        assert_eq!(service.calls.borrow().len(), 2);

        Ok(())
    }

    #[test]
    fn timeout_reported_as_error() -> Result<(), IosSignError> {
        let temp_dir = tempfile::tempdir()?;
        write_ipa(temp_dir.path());

        let service = RecordingService {
            finished_after: u64::MAX,
            ..Default::default()
        };
        let task = IosSignTask::new(
            &service,
            SignTaskPoller::with_sleeper(
                PollSettings {
                    timeout_minutes: 1,
                    interval: Duration::from_secs(30),
                },
                NoSleep,
            ),
        );

        let result = task.execute(workspace_param(temp_dir.path()))?;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.message, "Sign task timeout for 1 mins");
        assert_eq!(service.calls.borrow().len(), 4);

        Ok(())
    }
}
