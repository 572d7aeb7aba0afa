use std::{fmt, hash::Hash, str::FromStr, sync::Arc};

use crate::agent::Agent;
use crate::error::ArenaError;

/// Parsed agent descriptor: `name=kind[:args]`, or `kind[:args]` to reuse the kind as name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentSpec {
    pub name: String,
    pub kind: String,
    pub args: Option<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, args: Option<String>) -> Self {
        AgentSpec {
            name: name.into(),
            kind: kind.into(),
            args,
        }
    }

    /// Comma separated arguments, empty entries dropped.
    pub fn arg_list(&self) -> Vec<String> {
        self.args
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl FromStr for AgentSpec {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = match s.split_once('=') {
            Some((name, rest)) => (name.trim(), rest.trim()),
            None => ("", s),
        };
        let (kind, args) = match rest.split_once(':') {
            Some((kind, args)) => (kind.trim(), Some(args.to_string())),
            None => (rest, None),
        };
        if kind.is_empty() {
            return Err(ArenaError::config(format!("agent descriptor `{s}` has no kind")));
        }
        let name = if name.is_empty() { kind } else { name };
        Ok(AgentSpec::new(name, kind, args))
    }
}

impl fmt::Display for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.kind)?;
        if let Some(args) = &self.args {
            write!(f, ":{args}")?;
        }
        Ok(())
    }
}

/// Builds a fresh agent for every match.
pub trait AgentFactory: Send + Sync {
    /// `seed` is the match seed, for reproducible stochastic agents.
    fn spawn(&self, spec: &AgentSpec, seed: u64) -> Result<Box<dyn Agent>, ArenaError>;
}

impl<F> AgentFactory for F
where
    F: Fn(&AgentSpec, u64) -> Result<Box<dyn Agent>, ArenaError> + Send + Sync,
{
    fn spawn(&self, spec: &AgentSpec, seed: u64) -> Result<Box<dyn Agent>, ArenaError> {
        self(spec, seed)
    }
}

/// One entrant of an arena run.
pub struct Contestant {
    pub name: String,
    pub id: u32,
    pub spec: AgentSpec,
    factory: Arc<dyn AgentFactory>,
}

impl fmt::Debug for Contestant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contestant")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish()
    }
}

impl PartialEq for Contestant {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Contestant {}

impl Hash for Contestant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Contestant {
    pub fn new(id: u32, spec: AgentSpec, factory: Arc<dyn AgentFactory>) -> Contestant {
        Contestant {
            name: spec.name.clone(),
            id,
            spec,
            factory,
        }
    }

    /// Contestant built straight from a closure, bypassing registered kinds.
    pub fn from_fn<F>(id: u32, name: impl Into<String>, f: F) -> Contestant
    where
        F: Fn(u64) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        let name = name.into();
        let spec = AgentSpec::new(name, "custom", None);
        let factory = move |_: &AgentSpec, seed: u64| -> Result<Box<dyn Agent>, ArenaError> {
            Ok(f(seed))
        };
        Contestant::new(id, spec, Arc::new(factory))
    }

    pub fn spawn(&self, seed: u64) -> Result<Box<dyn Agent>, ArenaError> {
        self.factory.spawn(&self.spec, seed)
    }
}

impl fmt::Display for Contestant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
