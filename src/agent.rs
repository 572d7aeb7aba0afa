//! Uniform decision contract over heterogeneous agent backends.
//!
//! Every backend implements [`Agent::act`]. The arena never calls it directly: it goes through
//! [`decide`], which enforces the agent's [`CallPolicy`] (per-call timeout, bounded retries with
//! exponential backoff) and turns exhaustion into [`ArenaError::AgentUnavailable`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use tracing::{instrument, trace, warn};

use crate::error::{AgentError, ArenaError};
use crate::observation::{Action, Observation};

/// Timeout and retry policy declared by each agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        CallPolicy {
            timeout,
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        CallPolicy {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// A decision-making participant: remote model, local policy or human.
///
/// Implementations may hold a live connection and may suspend while waiting for it.
#[async_trait]
pub trait Agent: Send {
    /// Identifier used in logs and results.
    fn name(&self) -> &str;

    fn policy(&self) -> CallPolicy {
        CallPolicy::default()
    }

    /// Map an observation to an action.
    async fn act(&mut self, observation: &Observation) -> Result<Action, AgentError>;
}

/// Ask `agent` for an action, honoring its timeout and retry policy.
#[instrument(skip_all, fields(agent = agent.name()))]
pub async fn decide(agent: &mut dyn Agent, observation: &Observation) -> Result<Action, ArenaError> {
    let policy = agent.policy();
    let mut last_error = AgentError::Timeout(policy.timeout);
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            trace!(attempt, ?delay, "retrying");
            tokio::time::sleep(delay).await;
        }
        match tokio::time::timeout(policy.timeout, agent.act(observation)).await {
            Ok(Ok(action)) => return Ok(action),
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "agent call failed");
                last_error = e;
            }
            Err(_) => {
                warn!(attempt, timeout = ?policy.timeout, "agent call timed out");
                last_error = AgentError::Timeout(policy.timeout);
            }
        }
    }
    Err(ArenaError::AgentUnavailable {
        agent: agent.name().to_string(),
        reason: last_error.to_string(),
    })
}

/// Local policy computed by a closure.
pub struct FnAgent<F> {
    name: String,
    policy: CallPolicy,
    f: F,
}

impl<F> FnAgent<F>
where
    F: FnMut(&Observation) -> Action + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        FnAgent {
            name: name.into(),
            policy: CallPolicy::default(),
            f,
        }
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl<F> Agent for FnAgent<F>
where
    F: FnMut(&Observation) -> Action + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> CallPolicy {
        self.policy
    }

    async fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        Ok((self.f)(observation))
    }
}

/// Built-in scripted behaviors.
pub enum Script {
    /// Always the same action.
    Fixed(String),
    /// Repeats the list in order.
    Cycle { actions: Vec<String>, next: usize },
    /// Uniform choice, reproducible from the seed.
    Random { choices: Vec<String>, rng: SmallRng },
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Script::Fixed(a) => write!(f, "Fixed({a})"),
            Script::Cycle { actions, .. } => write!(f, "Cycle({})", actions.join(",")),
            Script::Random { choices, .. } => write!(f, "Random({})", choices.join(",")),
        }
    }
}

/// Agent following a [`Script`], without any backend.
#[derive(Debug)]
pub struct ScriptedAgent {
    name: String,
    policy: CallPolicy,
    script: Script,
}

impl ScriptedAgent {
    pub fn fixed(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self::from_script(name, Script::Fixed(action.into()))
    }

    pub fn cycle(name: impl Into<String>, actions: Vec<String>) -> Result<Self, ArenaError> {
        if actions.is_empty() {
            return Err(ArenaError::config("cycle agent needs at least one action"));
        }
        Ok(Self::from_script(name, Script::Cycle { actions, next: 0 }))
    }

    pub fn random(name: impl Into<String>, choices: Vec<String>, seed: u64) -> Result<Self, ArenaError> {
        if choices.is_empty() {
            return Err(ArenaError::config("random agent needs at least one choice"));
        }
        let rng = SmallRng::seed_from_u64(seed);
        Ok(Self::from_script(name, Script::Random { choices, rng }))
    }

    fn from_script(name: impl Into<String>, script: Script) -> Self {
        ScriptedAgent {
            name: name.into(),
            policy: CallPolicy::default(),
            script,
        }
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> CallPolicy {
        self.policy
    }

    async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
        let text = match &mut self.script {
            Script::Fixed(action) => action.clone(),
            Script::Cycle { actions, next } => {
                let action = actions[*next % actions.len()].clone();
                *next += 1;
                action
            }
            Script::Random { choices, rng } => choices
                .choose(rng)
                .cloned()
                .ok_or_else(|| AgentError::Backend("no choices".into()))?,
        };
        Ok(Action::new(text))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Flaky {
        calls: Arc<AtomicU32>,
        fail_first: u32,
        policy: CallPolicy,
    }

    #[async_trait]
    impl Agent for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn policy(&self) -> CallPolicy {
            self.policy
        }

        async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(AgentError::Backend(format!("failure {n}")))
            } else {
                Ok(Action::new("ok"))
            }
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Agent for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn policy(&self) -> CallPolicy {
            CallPolicy::new(Duration::from_millis(50), 1)
        }

        async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Action::new("late"))
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = CallPolicy::default().with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut agent = Flaky {
            calls: calls.clone(),
            fail_first: 2,
            policy: CallPolicy::new(Duration::from_secs(1), 2),
        };
        let action = decide(&mut agent, &Observation::default()).await.unwrap();
        assert_eq!(action.text, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut agent = Flaky {
            calls: calls.clone(),
            fail_first: 10,
            policy: CallPolicy::new(Duration::from_secs(1), 1),
        };
        let err = decide(&mut agent, &Observation::default()).await.unwrap_err();
        assert!(matches!(err, ArenaError::AgentUnavailable { ref agent, .. } if agent == "flaky"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let err = decide(&mut Sleepy, &Observation::default()).await.unwrap_err();
        match err {
            ArenaError::AgentUnavailable { reason, .. } => assert!(reason.contains("no response")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_agents() {
        let obs = Observation::default();
        let mut fixed = ScriptedAgent::fixed("rocky", "rock");
        assert_eq!(fixed.act(&obs).await.unwrap().text, "rock");

        let mut cycle = ScriptedAgent::cycle("c", vec!["a".into(), "b".into()]).unwrap();
        let seq = [
            cycle.act(&obs).await.unwrap().text,
            cycle.act(&obs).await.unwrap().text,
            cycle.act(&obs).await.unwrap().text,
        ];
        assert_eq!(seq, ["a", "b", "a"]);

        let choices = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let mut r1 = ScriptedAgent::random("r", choices.clone(), 7).unwrap();
        let mut r2 = ScriptedAgent::random("r", choices, 7).unwrap();
        for _ in 0..5 {
            assert_eq!(r1.act(&obs).await.unwrap(), r2.act(&obs).await.unwrap());
        }

        assert!(ScriptedAgent::cycle("empty", vec![]).is_err());
    }

    #[tokio::test]
    async fn closure_agent_sees_observation() {
        let mut agent = FnAgent::new("echo", |obs: &Observation| Action::new(obs.len().to_string()));
        assert_eq!(agent.act(&Observation::default()).await.unwrap().text, "0");
    }
}
