//! Terminal player: observations go to stdout, actions come from stdin.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::agent::{Agent, CallPolicy};
use crate::error::AgentError;
use crate::observation::{Action, Observation};

/// A person at the terminal: prints the observation, reads one line from stdin.
pub struct HumanAgent {
    name: String,
    input: Lines<BufReader<Stdin>>,
    timeout: Duration,
}

impl HumanAgent {
    pub fn new(name: impl Into<String>) -> Self {
        HumanAgent {
            name: name.into(),
            input: BufReader::new(tokio::io::stdin()).lines(),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Agent for HumanAgent {
    fn name(&self) -> &str {
        &self.name
    }

    // a retried prompt would just ask again, so humans get a single long attempt
    fn policy(&self) -> CallPolicy {
        CallPolicy::new(self.timeout, 0)
    }

    async fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        println!("{observation}");
        println!("{}, please enter the action:", self.name);
        match self.input.next_line().await {
            Ok(Some(line)) => Ok(Action::new(line.trim())),
            Ok(None) => Err(AgentError::Disconnected),
            Err(e) => Err(AgentError::Backend(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_long_attempt() {
        let human = HumanAgent::new("me").with_timeout(Duration::from_secs(30));
        assert_eq!(human.name(), "me");
        let policy = human.policy();
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.max_retries, 0);
    }
}
