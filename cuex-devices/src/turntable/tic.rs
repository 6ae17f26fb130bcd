use super::{MotorError, MotorResult, MotorSettings, StepController};
use std::process::Command;

/// A stepper controller driven through the `ticcmd` utility, locally or on
/// a remote host over SSH.
#[derive(Debug, Clone)]
pub struct TicCmd {
    program: String,
    serial: Option<String>,
    ssh_host: Option<String>,
}

impl TicCmd {
    pub fn new(program: impl Into<String>, serial: Option<String>, ssh_host: Option<String>) -> Self {
        Self {
            program: program.into(),
            serial,
            ssh_host,
        }
    }

    fn argv(&self, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        argv.push(self.program.clone());
        if let Some(serial) = &self.serial {
            argv.push("-d".to_string());
            argv.push(serial.clone());
        }
        argv.extend(args.iter().cloned());
        argv
    }

    fn run(&self, args: &[String]) -> MotorResult<String> {
        let argv = self.argv(args);
        let mut command = match &self.ssh_host {
            Some(host) => {
                let mut c = Command::new("ssh");
                c.arg(host).arg(argv.join(" "));
                c
            }
            None => {
                let mut c = Command::new(&argv[0]);
                c.args(&argv[1..]);
                c
            }
        };
        tracing::debug!(cmd = %argv.join(" "), "ticcmd");
        let output = command
            .output()
            .map_err(|e| MotorError::fault(format!("{}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MotorError::fault(format!(
                "{} exited with {}: {}",
                argv.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn flag(&self, flag: &str) -> MotorResult<()> {
        self.run(&[flag.to_string()]).map(|_| ())
    }

    fn flag_with(&self, flag: &str, value: impl ToString) -> MotorResult<()> {
        self.run(&[flag.to_string(), value.to_string()]).map(|_| ())
    }
}

/// Reads `Current position` out of a `--status` report.
pub fn parse_status(report: &str) -> MotorResult<i64> {
    if let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(report) {
        if let Some(pos) = doc.get("Current position").and_then(serde_yaml::Value::as_i64) {
            return Ok(pos);
        }
    }
    // Some firmware versions print lines the YAML parser rejects.
    report
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Current position:"))
        .find_map(|v| v.trim().parse().ok())
        .ok_or_else(|| MotorError::fault("status report has no current position"))
}

impl StepController for TicCmd {
    fn set_target(&mut self, position: i64) -> MotorResult<()> {
        self.flag_with("--position", position)
    }

    fn position(&mut self) -> MotorResult<i64> {
        parse_status(&self.run(&["--status".to_string()])?)
    }

    fn energize(&mut self) -> MotorResult<()> {
        self.flag("--energize")
    }

    fn deenergize(&mut self) -> MotorResult<()> {
        self.flag("--deenergize")
    }

    fn exit_safe_start(&mut self) -> MotorResult<()> {
        self.flag("--exit-safe-start")
    }

    fn halt_and_set_position(&mut self, position: i64) -> MotorResult<()> {
        self.flag_with("--halt-and-set-position", position)
    }

    fn configure(&mut self, settings: &MotorSettings) -> MotorResult<()> {
        let pairs = [
            ("--current", settings.current_ma),
            ("--step-mode", settings.step_mode),
            ("--max-speed", settings.max_speed),
            ("--max-accel", settings.max_accel),
        ];
        for (flag, value) in pairs {
            if let Some(value) = value {
                self.flag_with(flag, value)?;
            }
        }
        Ok(())
    }
}
