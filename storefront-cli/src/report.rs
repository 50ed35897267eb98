use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use storefront::{InstallError, InstallOutcome, WorkflowState};

/// How a command ended
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportState {
    Success,
    Failure,
    /// Nothing needed doing.
    Unchanged,
}

/// Result of one CLI command, printed in color or as JSON
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub command: String,
    pub app_name: Option<String>,
    pub state: ReportState,
    pub message: String,
    /// Command specific payload (trace, app state, version, tree).
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Whether running the same command again may succeed.
    pub retryable: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn success(command: &str, app_name: Option<&str>, message: String, elapsed: Duration) -> Self {
        Self {
            command: command.to_string(),
            app_name: app_name.map(str::to_string),
            state: ReportState::Success,
            message,
            data: None,
            error: None,
            retryable: false,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn unchanged(command: &str, app_name: &str, message: String, elapsed: Duration) -> Self {
        Self {
            state: ReportState::Unchanged,
            ..Self::success(command, Some(app_name), message, elapsed)
        }
    }

    pub fn from_outcome(outcome: &InstallOutcome, elapsed: Duration) -> Self {
        let report = if outcome.changed {
            Self::success(
                "install",
                Some(&outcome.app_name),
                format!("'{}' installed", outcome.app_name),
                elapsed,
            )
        } else {
            Self::unchanged(
                "install",
                &outcome.app_name,
                format!("'{}' is already installed", outcome.app_name),
                elapsed,
            )
        };
        report.with_data(serde_json::to_value(outcome).ok())
    }

    pub fn from_install_error(app_name: &str, error: &InstallError, elapsed: Duration) -> Self {
        Self {
            command: "install".to_string(),
            app_name: Some(app_name.to_string()),
            state: ReportState::Failure,
            message: format!("could not install '{app_name}'"),
            data: Some(serde_json::json!({ "kind": error.kind() })),
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn from_error(command: &str, app_name: Option<&str>, error: &anyhow::Error, elapsed: Duration) -> Self {
        let retryable = error
            .downcast_ref::<InstallError>()
            .map(InstallError::is_retryable)
            .unwrap_or(false);
        Self {
            command: command.to_string(),
            app_name: app_name.map(str::to_string),
            state: ReportState::Failure,
            message: format!("{command} failed"),
            data: None,
            error: Some(format!("{error:#}")),
            retryable,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn from_state(app_name: &str, state: WorkflowState, elapsed: Duration) -> Self {
        Self::success("status", Some(app_name), format!("'{app_name}' is {state}"), elapsed)
            .with_data(serde_json::to_value(state).ok())
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.state == ReportState::Failure
    }

    pub fn print_json(&self) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("❌ Failed to serialize report: {e}"),
        }
    }

    /// Display the result in a user-friendly format
    pub fn display(&self) {
        use colored::*;

        println!();
        println!("{}", "═".repeat(60));

        match self.state {
            ReportState::Success => {
                println!("{} {}", "✅ SUCCESS:".green().bold(), self.message);
            }
            ReportState::Failure => {
                println!("{} {}", "❌ FAILURE:".red().bold(), self.message);
            }
            ReportState::Unchanged => {
                println!("{} {}", "⏭️  UNCHANGED:".yellow().bold(), self.message);
            }
        }

        println!("{}", "─".repeat(60));
        println!("📊 Details:");
        println!("   • Command: {}", self.command);
        if let Some(app) = &self.app_name {
            println!("   • App: {app}");
        }
        let seconds = self.duration_ms as f64 / 1000.0;
        println!("   • Duration: {seconds:.2}s");

        if let Some(data) = &self.data {
            println!("{}", "─".repeat(60));
            match data {
                Value::String(text) => println!("   {text}"),
                _ => {
                    if let Ok(pretty) = serde_json::to_string_pretty(data) {
                        for line in pretty.lines() {
                            println!("   {line}");
                        }
                    }
                }
            }
        }

        if let Some(error) = &self.error {
            println!("{}", "─".repeat(60));
            println!("{} {}", "⚠️  Error:".yellow(), error);
            if self.retryable {
                println!(
                    "{}",
                    "   This failure is usually transient; running the command again may succeed."
                        .dimmed()
                );
            }
        }

        println!("{}", "═".repeat(60));
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront::Step;

    #[test]
    fn unchanged_install_is_not_a_failure() {
        let outcome = InstallOutcome {
            app_name: "Example App".to_string(),
            changed: false,
            state: WorkflowState::Installed,
            trace: vec![Step::Start, Step::Done],
        };
        let report = RunReport::from_outcome(&outcome, Duration::from_millis(1500));
        assert_eq!(report.state, ReportState::Unchanged);
        assert!(!report.is_failure());
        assert_eq!(report.duration_ms, 1500);
        let data = report.data.unwrap();
        assert_eq!(data["trace"], serde_json::json!(["start", "done"]));
    }

    #[test]
    fn timeouts_are_reported_as_retryable() {
        let err = InstallError::StartupTimeout(Duration::from_secs(15));
        let report = RunReport::from_install_error("Example App", &err, Duration::from_secs(15));
        assert!(report.is_failure());
        assert!(report.retryable);
        assert_eq!(report.data.unwrap()["kind"], "startup_timeout");

        let report = RunReport::from_install_error(
            "Example App",
            &InstallError::NotPurchased("Example App".to_string()),
            Duration::ZERO,
        );
        assert!(!report.retryable);
        assert_eq!(
            report.error.as_deref(),
            Some("App 'Example App' has not been purchased")
        );
    }

    #[test]
    fn anyhow_errors_keep_their_install_error_retry_hint() {
        let err = anyhow::Error::new(InstallError::NavigationTimeout(Duration::from_secs(15)));
        let report = RunReport::from_error("version", Some("Example App"), &err, Duration::ZERO);
        assert!(report.retryable);
    }
}
