use std::{os::unix::process::ExitStatusExt, process::{ExitStatus, Output}};

use anyhow::{anyhow, bail, Error};

use crate::crate_private::Sealed;

/// Extension for `std::process::Output` to easily check status, produce anyhow errors, and get output
/// This is a sealed trait, so it cannot be implemented outside of this crate.
pub trait OutputChecker: Sealed {
    /// Check if the process exited successfully
    fn is_success(&self) -> bool;

    /// Get the exit code of the process, if it exited normally
    fn exit_code(&self) -> Option<i32>;

    /// Get the signal that terminated the process, if it was terminated by a signal
    fn end_signal(&self) -> Option<i32>;

    /// Return the type of process that was running
    fn process_type(&self) -> &'static str {
        "process"
    }

    /// Get stdout
    fn output(&self) -> String {
        "".into()
    }

    /// Get stderr
    fn error_output(&self) -> String {
        "".into()
    }

    /// Get all available output, useful for reporting or debugging
    fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{}\n", stdout);
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{}\n", stderr);
        }

        res
    }

    /// Check if the process exited successfully, otherwise produce an error
    fn check(&self) -> Result<(), Error> {
        if self.is_success() {
            return Ok(());
        }

        Err(match self.output_report() {
            s if !s.is_empty() => anyhow!("Process output:\n{}", s).context(self.explain_exit()),
            _ => anyhow!("(No output was captured)").context(self.explain_exit()),
        })
    }

    /// Check if the process exited successfully and return the output, otherwise produce an error with the output
    fn check_output(&self) -> Result<String, Error> {
        self.check()?;
        Ok(self.output())
    }

    /// Produce a string explaining the exit status of the process
    fn explain_exit(&self) -> String {
        if let Some(code) = self.exit_code() {
            format!("{} exited with status: {code}", self.process_type())
        } else if let Some(signal) = self.end_signal() {
            format!("{} was terminated by signal: {signal}", self.process_type())
        } else {
            format!("{} exited with unknown status", self.process_type())
        }
    }
}

impl Sealed for Output {}

impl OutputChecker for Output {
    /// Check if the process exited successfully
    fn is_success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code of the process, if it exited normally
    fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Get the signal that terminated the process, if it was terminated by a signal
    fn end_signal(&self) -> Option<i32> {
        self.status.end_signal()
    }

    /// Get stderr
    fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into()
    }

    /// Get stdout
    fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into()
    }
}

impl Sealed for ExitStatus {}

impl OutputChecker for ExitStatus {
    fn is_success(&self) -> bool {
        self.success()
    }

    fn exit_code(&self) -> Option<i32> {
        self.code()
    }

    fn end_signal(&self) -> Option<i32> {
        self.signal()
    }
}

impl Sealed for Result<Output, std::io::Error> {}

impl OutputChecker for Result<Output, std::io::Error> {
    /// Check if the process exited successfully
    fn is_success(&self) -> bool {
        self.as_ref()
            .map(|output| output.is_success())
            .unwrap_or(false)
    }

    /// Get the exit code of the process, if it exited normally
    fn exit_code(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.exit_code())
    }

    /// Get the signal that terminated the process, if it was terminated by a signal
    fn end_signal(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.end_signal())
    }

    /// When available, get stderr, otherwise get stdout
    fn error_output(&self) -> String {
        self.as_ref()
            .map(|output| output.error_output())
            .unwrap_or("".into())
    }

    /// Get stdout
    fn output(&self) -> String {
        self.as_ref()
            .map(|output| output.output())
            .unwrap_or("".into())
    }

    /// Check if the process exited successfully, otherwise produce an error
    fn check(&self) -> Result<(), Error> {
        match self {
            Ok(output) => output.check(),
            Err(e) => bail!("Failed to execute {}: {}", self.process_type(), e),
        }
    }

    /// Check if the process exited successfully and return the output, otherwise produce an error with the output
    fn check_output(&self) -> Result<String, Error> {
        match self {
            Ok(output) => output.check_output(),
            Err(e) => bail!("Failed to execute {}: {}", self.process_type(), e),
        }
    }

    /// Produce a string explaining the exit status of the process
    fn explain_exit(&self) -> String {
        match self {
            Ok(output) => output.explain_exit(),
            Err(e) => format!("Failed to execute {}: {}", self.process_type(), e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::process::Command;

    #[test]
    fn test_output_checker() {
        let output = Command::new("echo").arg("something").output().unwrap();

        assert!(output.is_success());
        assert_eq!(output.exit_code(), Some(0));
        assert_eq!(output.end_signal(), None);
        assert_eq!(output.error_output(), "");
        assert_eq!(output.output(), "something\n");
        assert_eq!(output.explain_exit(), "process exited with status: 0");
        assert!(matches!(output.check(), Ok(())));
        assert!(matches!(output.check_output(), Ok(s) if s == "something\n"));

        let output = Command::new("false").arg("something").output().unwrap();

        assert!(!output.is_success());
        assert_eq!(output.exit_code(), Some(1));
        assert_eq!(output.end_signal(), None);
        assert_eq!(output.error_output(), "");
        assert_eq!(output.output(), "");
        assert_eq!(output.explain_exit(), "process exited with status: 1");

        output.check().unwrap_err();

        // Check trait on io::Result<Output>
        let result = Command::new("/doesnotexist_1234").arg("something").output();

        assert!(result.is_err(), "Expected error, got {:?}", result);

        assert!(!result.is_success(), "Expected failure, got {:?}", result);

        assert_eq!(
            result.exit_code(),
            None,
            "Expected exit code None, got {:?}",
            result
        );

        assert_eq!(
            result.end_signal(),
            None,
            "Expected end signal None, got {:?}",
            result
        );

        assert!(result.check().is_err(), "Expected error, got {:?}", result);
        assert!(
            result.check_output().is_err(),
            "Expected error, got {:?}",
            result
        );
        assert!(result.explain_exit().contains("Failed to execute process:"));

        // Check exit codes
        let result = Command::new("bash")
            .arg("-c")
            .arg("exit 123")
            .output()
            .expect("Failed to start bash");

        assert!(!result.is_success(), "Expected failure, got {:?}", result);

        assert_eq!(
            result.exit_code(),
            Some(123),
            "Expected exit code 123, got {:?}",
            result
        );

        assert_eq!(
            result.end_signal(),
            None,
            "Expected end signal None, got {:?}",
            result
        );
    }
}
