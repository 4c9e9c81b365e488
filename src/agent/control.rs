use serde::Serialize;
use tracing::{error, info};

use super::commands;
use super::envfile::patch_env;
use crate::error::{FipError, Result};
use crate::model::{Agent, AgentAction, CloudAccount, Host};
use crate::remote::{execute, with_session, RemoteShell, ShellSession, Timeouts};

/// Result of a single-target control action, shown to the operator as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub message: String,
}

impl ControlOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        ControlOutcome {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ControlOutcome {
            success: false,
            message: message.into(),
        }
    }
}

impl From<FipError> for ControlOutcome {
    fn from(e: FipError) -> Self {
        ControlOutcome::failed(e.to_string())
    }
}

/// Identity values written into an agent's credential file on rebind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub username: String,
    pub password: String,
    pub project_id: String,
    pub project_name: String,
    pub auth_url: Option<String>,
}

impl Binding {
    /// `project_name` is the label the agent will report; callers pass the
    /// provider-resolved name when they have one
    pub fn for_account(account: &CloudAccount, project_name: &str) -> Self {
        Binding {
            username: account.username.clone(),
            password: account.password.clone(),
            project_id: account.project_id.clone(),
            project_name: project_name.to_string(),
            auth_url: Some(account.auth_url.clone()).filter(|u| !u.is_empty()),
        }
    }

    fn updates(&self) -> Vec<(&str, &str)> {
        let mut updates = vec![
            (commands::USERNAME_KEY, self.username.as_str()),
            (commands::PASSWORD_KEY, self.password.as_str()),
            (commands::PROJECT_ID_KEY, self.project_id.as_str()),
            (commands::PROJECT_NAME_KEY, self.project_name.as_str()),
        ];
        if let Some(url) = &self.auth_url {
            updates.push((commands::AUTH_URL_KEY, url.as_str()));
        }
        updates
    }
}

fn run_action(session: &mut dyn ShellSession, agent: &Agent, action: AgentAction, timeouts: Timeouts) -> Result<ControlOutcome> {
    let out = session.exec(&commands::control(action, &agent.service()), timeouts.command)?;
    if out.success() {
        Ok(ControlOutcome::ok(format!("Service {} OK", action)))
    } else {
        Ok(ControlOutcome::failed(out.message()))
    }
}

/// Start, stop or restart an agent's service.
///
/// `action` is validated before any connection is made.
pub fn control_agent(
    shell: &dyn RemoteShell,
    host: &Host,
    agent: &Agent,
    action: &str,
    timeouts: Timeouts,
) -> ControlOutcome {
    let action: AgentAction = match action.parse() {
        Ok(action) => action,
        Err(e) => return ControlOutcome::from(e),
    };

    let outcome = with_session(shell, host, timeouts, |session| {
        run_action(session, agent, action, timeouts)
    })
    .unwrap_or_else(ControlOutcome::from);

    if outcome.success {
        info!("Agent {}: {}/{} - OK", action, host.name, agent.name);
    } else {
        error!("Agent {} failed: {}/{} - {}", action, host.name, agent.name, outcome.message);
    }
    outcome
}

/// Point an agent at a different cloud project: patch its credential file,
/// then restart it. The first failing step ends the operation.
pub fn rebind_agent(
    shell: &dyn RemoteShell,
    host: &Host,
    agent: &Agent,
    binding: &Binding,
    timeouts: Timeouts,
) -> ControlOutcome {
    let env_path = agent.env_path();

    let outcome = with_session(shell, host, timeouts, |session| {
        let current = session.exec(&commands::read_file(&env_path), timeouts.command)?;
        if !current.success() {
            return Ok(ControlOutcome::failed(format!(
                "Cannot read {}: {}",
                env_path,
                current.message()
            )));
        }

        let patched = patch_env(&current.stdout, &binding.updates());
        let written = session.exec(&commands::write_file(&env_path, &patched), timeouts.command)?;
        if !written.success() {
            return Ok(ControlOutcome::failed(format!(
                "Cannot write {}: {}",
                env_path,
                written.message()
            )));
        }

        let restarted = run_action(session, agent, AgentAction::Restart, timeouts)?;
        if restarted.success {
            Ok(ControlOutcome::ok(format!(
                "Project changed to {}; {}",
                binding.project_name, restarted.message
            )))
        } else {
            Ok(restarted)
        }
    })
    .unwrap_or_else(ControlOutcome::from);

    if outcome.success {
        info!("Agent rebind: {}/{} -> {}", host.name, agent.name, binding.project_name);
    } else {
        error!("Agent rebind failed: {}/{} - {}", host.name, agent.name, outcome.message);
    }
    outcome
}

/// Tail an agent's journal. The text is stdout on success, else the error output.
pub fn fetch_logs(
    shell: &dyn RemoteShell,
    host: &Host,
    agent: &Agent,
    lines: u32,
    timeouts: Timeouts,
) -> Result<String> {
    let out = execute(shell, host, &commands::journal(&agent.service(), lines), timeouts)?;
    if out.success() {
        Ok(out.stdout.trim().to_string())
    } else {
        let err = out.stderr.trim();
        Ok(if err.is_empty() { out.stdout.trim() } else { err }.to_string())
    }
}
