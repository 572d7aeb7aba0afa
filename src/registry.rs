//! Game and agent registries.
//!
//! A [`Registry`] maps game identifiers to [`GameFactory`]s and agent kinds to
//! [`AgentFactory`]s. The arena only depends on these factories, never on concrete games.
//!
//! Registries are plain values: tests should build their own with [`Registry::new`]. A
//! process-wide instance is available once explicitly installed with [`Registry::install`];
//! [`Registry::global`] fails before that.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::debug;

use crate::agent::{Agent, ScriptedAgent};
use crate::contestant::{AgentFactory, AgentSpec, Contestant};
use crate::error::ArenaError;
use crate::game_interface::GameFactory;
use crate::human::HumanAgent;

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Mapping from identifiers to game and agent factories.
#[derive(Default)]
pub struct Registry {
    games: BTreeMap<String, Arc<dyn GameFactory>>,
    agent_kinds: BTreeMap<String, Arc<dyn AgentFactory>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference games and the `fixed`, `cycle`, `random` and `human`
    /// agent kinds.
    pub fn with_builtins() -> Result<Self, ArenaError> {
        let mut registry = Self::new();
        crate::games::register(&mut registry)?;
        registry.register_builtin_agents()?;
        Ok(registry)
    }

    fn register_builtin_agents(&mut self) -> Result<(), ArenaError> {
        self.register_agent_kind(
            "fixed",
            |spec: &AgentSpec, _seed: u64| -> Result<Box<dyn Agent>, ArenaError> {
                let action = spec
                    .args
                    .clone()
                    .ok_or_else(|| ArenaError::config(format!("{spec}: fixed agent needs an action")))?;
                Ok(Box::new(ScriptedAgent::fixed(spec.name.clone(), action)))
            },
        )?;
        self.register_agent_kind(
            "cycle",
            |spec: &AgentSpec, _seed: u64| -> Result<Box<dyn Agent>, ArenaError> {
                Ok(Box::new(ScriptedAgent::cycle(
                    spec.name.clone(),
                    spec.arg_list(),
                )?))
            },
        )?;
        self.register_agent_kind(
            "random",
            |spec: &AgentSpec, seed: u64| -> Result<Box<dyn Agent>, ArenaError> {
                Ok(Box::new(ScriptedAgent::random(
                    spec.name.clone(),
                    spec.arg_list(),
                    seed,
                )?))
            },
        )?;
        self.register_agent_kind(
            "human",
            |spec: &AgentSpec, _seed: u64| -> Result<Box<dyn Agent>, ArenaError> {
                let timeout = spec
                    .args
                    .as_deref()
                    .map(|secs| {
                        secs.trim().parse::<u64>().map_err(|_| {
                            ArenaError::config(format!("{spec}: `{secs}` is not a number of seconds"))
                        })
                    })
                    .transpose()?;
                let mut human = HumanAgent::new(spec.name.clone());
                if let Some(secs) = timeout {
                    human = human.with_timeout(Duration::from_secs(secs));
                }
                Ok(Box::new(human))
            },
        )
    }

    pub fn register_game(
        &mut self,
        id: impl Into<String>,
        factory: impl GameFactory + 'static,
    ) -> Result<(), ArenaError> {
        let id = id.into();
        if self.games.contains_key(&id) {
            return Err(ArenaError::config(format!("game `{id}` registered twice")));
        }
        debug!(game = id, "registering game");
        self.games.insert(id, Arc::new(factory));
        Ok(())
    }

    pub fn register_agent_kind(
        &mut self,
        kind: impl Into<String>,
        factory: impl AgentFactory + 'static,
    ) -> Result<(), ArenaError> {
        let kind = kind.into();
        if self.agent_kinds.contains_key(&kind) {
            return Err(ArenaError::config(format!("agent kind `{kind}` registered twice")));
        }
        self.agent_kinds.insert(kind, Arc::new(factory));
        Ok(())
    }

    pub fn game(&self, id: &str) -> Result<Arc<dyn GameFactory>, ArenaError> {
        self.games.get(id).cloned().ok_or_else(|| {
            ArenaError::config(format!(
                "unknown game `{id}` (known: {})",
                self.game_ids().join(", ")
            ))
        })
    }

    pub fn game_ids(&self) -> Vec<&str> {
        self.games.keys().map(String::as_str).collect()
    }

    pub fn agent_kinds(&self) -> Vec<&str> {
        self.agent_kinds.keys().map(String::as_str).collect()
    }

    /// Resolve descriptors into contestants with unique names.
    pub fn contestants(&self, specs: &[AgentSpec]) -> Result<Vec<Arc<Contestant>>, ArenaError> {
        let mut names = HashSet::new();
        let mut contestants = Vec::with_capacity(specs.len());
        for (id, spec) in specs.iter().enumerate() {
            if !names.insert(spec.name.as_str()) {
                return Err(ArenaError::config(format!(
                    "two agents are named `{}`",
                    spec.name
                )));
            }
            let factory = self.agent_kinds.get(&spec.kind).cloned().ok_or_else(|| {
                ArenaError::config(format!(
                    "{spec}: unknown agent kind `{}` (known: {})",
                    spec.kind,
                    self.agent_kinds().join(", ")
                ))
            })?;
            contestants.push(Arc::new(Contestant::new(id as u32, spec.clone(), factory)));
        }
        Ok(contestants)
    }

    /// Make this registry the process-wide one. Only the first call succeeds.
    pub fn install(self) -> Result<Arc<Registry>, ArenaError> {
        let mut fresh = Some(self);
        let installed = GLOBAL.get_or_init(|| Arc::new(fresh.take().unwrap_or_default()));
        if fresh.is_some() {
            return Err(ArenaError::config("a global registry is already installed"));
        }
        Ok(installed.clone())
    }

    /// The process-wide registry.
    pub fn global() -> Result<Arc<Registry>, ArenaError> {
        GLOBAL
            .get()
            .cloned()
            .ok_or_else(|| ArenaError::config("global registry used before Registry::install"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::game_interface::GameConfig;

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::with_builtins().unwrap();
        assert_eq!(registry.game_ids(), vec!["rock_paper_scissors", "take_away"]);
        assert_eq!(registry.agent_kinds(), vec!["cycle", "fixed", "human", "random"]);
        let env = registry
            .game("take_away")
            .unwrap()
            .create(3, &GameConfig::new())
            .unwrap();
        assert_eq!(env.player_count(), 3);
    }

    #[test]
    fn unknown_game_is_a_configuration_error() {
        let registry = Registry::new();
        assert!(matches!(
            registry.game("chess"),
            Err(ArenaError::Configuration(_))
        ));
    }

    #[test]
    fn duplicate_registrations_fail() {
        let mut registry = Registry::with_builtins().unwrap();
        assert!(crate::games::register(&mut registry).is_err());
    }

    #[test]
    fn contestants_need_known_kinds_and_unique_names() {
        let registry = Registry::with_builtins().unwrap();
        let specs = ["a=fixed:rock", "b=cycle:rock,paper"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect::<Vec<AgentSpec>>();
        let contestants = registry.contestants(&specs).unwrap();
        assert_eq!(contestants.len(), 2);
        assert_eq!(contestants[1].id, 1);
        assert!(contestants[0].spawn(0).is_ok());

        let dup = vec![specs[0].clone(), specs[0].clone()];
        assert!(registry.contestants(&dup).is_err());
        let unknown = vec!["x=telepathy".parse().unwrap()];
        assert!(registry.contestants(&unknown).is_err());
        let missing_action = vec!["y=fixed".parse().unwrap()];
        let c = registry.contestants(&missing_action).unwrap();
        assert!(c[0].spawn(0).is_err());
        let bad_timeout = vec!["z=human:soon".parse().unwrap()];
        let c = registry.contestants(&bad_timeout).unwrap();
        assert!(c[0].spawn(0).is_err());
    }
}
