use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::executor::{RemoteExecutor, RemoteOutput};

#[derive(Debug, Clone)]
enum Reply {
    Output(RemoteOutput),
    Transport(String),
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    reply: Reply,
}

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<String>,
    rules: Vec<Rule>,
    delay: Option<Duration>,
}

/// Scripted [`RemoteExecutor`] for tests.
///
/// Every executed command line is recorded. Replies are chosen by the most
/// recently registered rule whose pattern is a substring of the command;
/// unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&self, pattern: &str, reply: Reply) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.rules.push(Rule {
            pattern: pattern.to_string(),
            reply,
        });
    }

    /// Reply with `stdout` to commands containing `pattern`.
    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.push_rule(pattern, Reply::Output(RemoteOutput::new(stdout, "")));
    }

    /// Reply with a full output (both streams) to commands containing `pattern`.
    pub fn respond_output(&self, pattern: &str, output: RemoteOutput) {
        self.push_rule(pattern, Reply::Output(output));
    }

    /// Make commands containing `pattern` report `stderr` as a hypervisor error.
    pub fn fail_command(&self, pattern: &str, stderr: &str) {
        let output = RemoteOutput {
            stdout: String::new(),
            stderr: format!("{}\n", stderr),
            exit_code: Some(1),
        };
        self.push_rule(pattern, Reply::Output(output));
    }

    /// Make commands containing `pattern` fail to reach the host.
    pub fn fail_transport(&self, pattern: &str) {
        self.push_rule(
            pattern,
            Reply::Transport(format!("connection refused while running '{}'", pattern)),
        );
    }

    /// Drop every scripted reply.
    pub fn clear_rules(&self) {
        self.state.lock().expect("mock state poisoned").rules.clear();
    }

    /// Sleep this long inside every call, to widen race windows in tests.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().expect("mock state poisoned").delay = Some(delay);
    }

    /// Every command line executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .commands
            .clone()
    }

    /// Number of executed commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| cmd.contains(pattern))
            .count()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, command: &str) -> Result<RemoteOutput> {
        let (reply, delay) = {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.commands.push(command.to_string());
            let reply = state
                .rules
                .iter()
                .rev()
                .find(|rule| command.contains(&rule.pattern))
                .map(|rule| rule.reply.clone());
            (reply, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Transport(message)) => Err(ProviderError::Transport(message)),
            None => Ok(RemoteOutput::default()),
        }
    }
}
