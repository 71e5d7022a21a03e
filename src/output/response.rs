//! JSON envelope written to stdout for every command, and exit codes for errors.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;
use sonitas_ci::error::Hint;
use sonitas_ci::{Error, ErrorCode, Result};

/// `{"success": true, "data": ...}` or `{"success": false, "error": ...}`.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody<'a>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
    details: &'a Value,
    #[serde(skip_serializing_if = "no_hints")]
    hints: &'a [Hint],
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

fn no_hints(hints: &&[Hint]) -> bool {
    hints.is_empty()
}

impl<'a> Envelope<'a> {
    fn from_result(result: &'a Result<Value>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(ErrorBody {
                    code: err.code.as_str(),
                    message: &err.message,
                    details: &err.details,
                    hints: &err.hints,
                    retryable: err.retryable,
                }),
            },
        }
    }
}

/// Serialize command output, keeping the command's own exit code on success.
pub fn map_cmd_result_to_json<T: Serialize>(result: Result<(T, i32)>) -> (Result<Value>, i32) {
    let (data, exit_code) = match result {
        Ok(done) => done,
        Err(err) => {
            let code = exit_code_for_error(err.code);
            return (Err(err), code);
        }
    };

    match serde_json::to_value(data) {
        Ok(value) => (Ok(value), exit_code),
        Err(e) => (
            Err(Error::internal_json(e.to_string(), Some("serialize response".to_string()))),
            1,
        ),
    }
}

pub(crate) fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigMissingKey
        | ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument
        | ErrorCode::ValidationInvalidJson
        | ErrorCode::ValidationInvalidYaml => 2,

        ErrorCode::WorkflowNotFound | ErrorCode::JobNotFound | ErrorCode::TaskNotFound => 4,

        ErrorCode::GitCommandFailed => 20,

        ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}

pub fn print_json_result(result: Result<Value>) -> Result<()> {
    let payload = serde_json::to_string_pretty(&Envelope::from_result(&result))
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize response".to_string())))?;

    let mut out = io::stdout().lock();
    match writeln!(out, "{}", payload) {
        Ok(()) => Ok(()),
        // Reader went away (e.g. piped into `head`).
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(Error::internal_io(e.to_string(), Some("write stdout".to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_exit_codes() {
        assert_eq!(exit_code_for_error(ErrorCode::ValidationInvalidYaml), 2);
        assert_eq!(exit_code_for_error(ErrorCode::TaskNotFound), 4);
        assert_eq!(exit_code_for_error(ErrorCode::GitCommandFailed), 20);
        assert_eq!(exit_code_for_error(ErrorCode::InternalIoError), 1);
    }

    #[test]
    fn command_exit_code_passes_through() {
        let (value, code) = map_cmd_result_to_json(Ok((serde_json::json!({"status": "failed"}), 1)));
        assert_eq!(code, 1);
        assert_eq!(value.unwrap()["status"], "failed");

        let (value, code) = map_cmd_result_to_json::<()>(Err(Error::workflow_not_found("x.yml")));
        assert_eq!(code, 4);
        assert!(value.is_err());
    }

    #[test]
    fn envelope_carries_data_or_error() {
        let ok: Result<Value> = Ok(serde_json::json!({"command": "plan"}));
        let json = serde_json::to_value(Envelope::from_result(&ok)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["command"], "plan");
        assert!(json.get("error").is_none());

        let failed: Result<Value> = Err(Error::task_not_found("deploy", vec!["lint".to_string()]));
        let json = serde_json::to_value(Envelope::from_result(&failed)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "task.not_found");
        assert!(json.get("data").is_none());
    }
}
