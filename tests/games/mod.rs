#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Level, Metadata};
use tracing_subscriber::layer::{Context, Filter, SubscriberExt};
use tracing_subscriber::{fmt, Layer};
use turn_arena::environment::StepOutcome;
use turn_arena::prelude::*;

struct UpToDebug;

impl<S> Filter<S> for UpToDebug {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::DEBUG
    }
}

/// Debug events of the whole test binary, captured per test.
pub fn init_test_logger() {
    let format = fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_target(false);

    let reg = tracing_subscriber::Registry::default().with(
        fmt::layer()
            .event_format(format)
            .with_test_writer()
            .with_filter(UpToDebug),
    );

    let _ = tracing::subscriber::set_global_default(reg);
}

/// Counts environments between `reset` and `close`, remembering the peak.
#[derive(Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn open(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn close(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Factory of take-away matches with `stones` stones, measured by this gauge.
    pub fn take_away(&self, stones: u64) -> impl GameFactory + 'static {
        let gauge = self.clone();
        move |players: usize, config: &GameConfig| -> Result<Box<dyn Environment>, ArenaError> {
            let inner = GameEnvironment::new(TakeAway::new(stones), players, config.clone());
            Ok(Box::new(Gauged {
                inner: Box::new(inner),
                gauge: gauge.clone(),
                open: false,
            }))
        }
    }
}

struct Gauged {
    inner: Box<dyn Environment>,
    gauge: Gauge,
    open: bool,
}

impl Environment for Gauged {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn player_count(&self) -> usize {
        self.inner.player_count()
    }

    fn mode(&self) -> TurnMode {
        self.inner.mode()
    }

    fn reset(&mut self, seed: u64) -> Result<(), ArenaError> {
        if !self.open {
            self.open = true;
            self.gauge.open();
        }
        self.inner.reset(seed)
    }

    fn get_observation(&self, player: PlayerId) -> Result<Observation, ArenaError> {
        self.inner.get_observation(player)
    }

    fn step(&mut self, player: PlayerId, action: Action) -> Result<StepOutcome, ArenaError> {
        self.inner.step(player, action)
    }

    fn active_players(&self) -> Vec<PlayerId> {
        self.inner.active_players()
    }

    fn skip(&mut self, player: PlayerId) -> Result<StepOutcome, ArenaError> {
        self.inner.skip(player)
    }

    fn terminate(
        &mut self,
        termination: Termination,
        awards: &[(PlayerId, f64)],
    ) -> Result<(), ArenaError> {
        self.inner.terminate(termination, awards)
    }

    fn state(&self) -> &State {
        self.inner.state()
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.gauge.close();
        }
        self.inner.close();
    }
}

/// Answers `action` after `delay`.
pub struct Slow {
    pub name: String,
    pub action: String,
    pub delay: Duration,
}

#[async_trait]
impl Agent for Slow {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy::new(Duration::from_secs(10), 0)
    }

    async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
        tokio::time::sleep(self.delay).await;
        Ok(Action::new(self.action.clone()))
    }
}

/// Every call fails; gives up after one retry.
pub struct Broken {
    pub name: String,
}

#[async_trait]
impl Agent for Broken {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy::new(Duration::from_millis(50), 1)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(1))
    }

    async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
        Err(AgentError::Disconnected)
    }
}

/// Answers the scripted actions, then never answers again.
pub struct Stalling {
    pub name: String,
    pub answers: Vec<String>,
}

#[async_trait]
impl Agent for Stalling {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> CallPolicy {
        CallPolicy::new(Duration::from_millis(100), 0)
    }

    async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
        if self.answers.is_empty() {
            std::future::pending::<()>().await;
        }
        Ok(Action::new(self.answers.remove(0)))
    }
}

/// Panics on its first call.
pub struct Panicking;

#[async_trait]
impl Agent for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
        panic!("agent bug");
    }
}

pub fn slow(id: u32, name: &str, action: &str, delay: Duration) -> Arc<Contestant> {
    let (agent_name, action) = (name.to_string(), action.to_string());
    Arc::new(Contestant::from_fn(id, name, move |_| -> Box<dyn Agent> {
        Box::new(Slow {
            name: agent_name.clone(),
            action: action.clone(),
            delay,
        })
    }))
}

pub fn broken(id: u32, name: &str) -> Arc<Contestant> {
    let agent_name = name.to_string();
    Arc::new(Contestant::from_fn(id, name, move |_| -> Box<dyn Agent> {
        Box::new(Broken {
            name: agent_name.clone(),
        })
    }))
}

pub fn fixed(id: u32, name: &str, action: &str) -> Arc<Contestant> {
    let (agent_name, action) = (name.to_string(), action.to_string());
    Arc::new(Contestant::from_fn(id, name, move |_| -> Box<dyn Agent> {
        Box::new(ScriptedAgent::fixed(agent_name.clone(), action.clone()))
    }))
}

pub fn bracket(matches: &[&[&str]]) -> FixedBracket {
    FixedBracket::new(
        matches
            .iter()
            .map(|m| m.iter().map(|n| n.to_string()).collect())
            .collect(),
    )
}

pub fn quiet() -> ArenaConfig {
    ArenaConfig::new().with_verbose(false)
}
