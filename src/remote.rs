//! Exchange point for agents living outside the process.
//!
//! A [`RemoteAgent`] forwards each observation as a [`DecisionRequest`] over a channel and waits
//! for the matching reply. Whatever transport sits on the other side (an HTTP server, a
//! websocket, a test harness) only has to drain the [`RemoteEndpoint`] and answer each request.
//! Timeouts and retries stay with the agent's [`CallPolicy`].

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::agent::{Agent, CallPolicy};
use crate::error::AgentError;
use crate::observation::{Action, Observation};

/// One pending decision for a remote player.
#[derive(Debug)]
pub struct DecisionRequest {
    pub agent: String,
    pub observation: Observation,
    reply: oneshot::Sender<Action>,
}

impl DecisionRequest {
    /// Answer the request. Gives the action back if the asking side stopped waiting.
    pub fn respond(self, action: Action) -> Result<(), Action> {
        self.reply.send(action)
    }

    /// True if the asking side already gave up (timeout, match cancelled).
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// Receiving half: where the transport picks up requests.
#[derive(Debug)]
pub struct RemoteEndpoint {
    requests: mpsc::Receiver<DecisionRequest>,
}

impl RemoteEndpoint {
    /// Next request, or `None` once every matching agent was dropped.
    pub async fn next(&mut self) -> Option<DecisionRequest> {
        self.requests.recv().await
    }
}

/// Agent whose decisions are made on the other side of a channel.
#[derive(Debug)]
pub struct RemoteAgent {
    name: String,
    policy: CallPolicy,
    requests: mpsc::Sender<DecisionRequest>,
}

impl RemoteAgent {
    /// Create an agent and the endpoint serving it. `buffer` bounds queued requests.
    pub fn channel(name: impl Into<String>, buffer: usize) -> (RemoteAgent, RemoteEndpoint) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let agent = RemoteAgent {
            name: name.into(),
            policy: CallPolicy::default(),
            requests: tx,
        };
        (agent, RemoteEndpoint { requests: rx })
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> CallPolicy {
        self.policy
    }

    async fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let (reply, answer) = oneshot::channel();
        let request = DecisionRequest {
            agent: self.name.clone(),
            observation: observation.clone(),
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| AgentError::Disconnected)?;
        trace!(agent = self.name, "waiting for remote decision");
        answer.await.map_err(|_| AgentError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::decide;
    use crate::error::ArenaError;

    #[tokio::test]
    async fn request_reply_round_trip() {
        let (mut agent, mut endpoint) = RemoteAgent::channel("remote", 4);
        let server = tokio::spawn(async move {
            let request = endpoint.next().await.unwrap();
            assert_eq!(request.agent, "remote");
            request.respond(Action::new("[paper]")).unwrap();
        });
        let action = agent.act(&Observation::default()).await.unwrap();
        assert_eq!(action.text, "[paper]");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_endpoint_disconnects() {
        let (mut agent, endpoint) = RemoteAgent::channel("remote", 1);
        drop(endpoint);
        assert_eq!(
            agent.act(&Observation::default()).await,
            Err(AgentError::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_endpoint_times_out() {
        let (agent, mut endpoint) = RemoteAgent::channel("remote", 4);
        let mut agent = agent.with_policy(CallPolicy::new(Duration::from_millis(100), 1));
        // keep requests alive but never answer
        let hold = tokio::spawn(async move {
            let mut held = vec![];
            while let Some(r) = endpoint.next().await {
                held.push(r);
            }
            held.len()
        });
        let err = decide(&mut agent, &Observation::default()).await.unwrap_err();
        assert!(matches!(err, ArenaError::AgentUnavailable { .. }));
        drop(agent);
        assert_eq!(hold.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_call_is_abandoned() {
        let (mut agent, mut endpoint) = RemoteAgent::channel("remote", 1);
        let call = tokio::spawn(async move { agent.act(&Observation::default()).await });
        let request = endpoint.next().await.unwrap();
        assert!(!request.is_abandoned());
        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert!(request.is_abandoned());
    }
}
