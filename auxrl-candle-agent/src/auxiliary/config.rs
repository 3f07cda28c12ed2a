//! Configuration of auxiliary tasks.
use crate::error::AgentError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Auxiliary task.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum AuxTask {
    /// Temporal coherence, `tc`.
    Tc,

    /// Proportionality, `prop`.
    Prop,

    /// Causality, `caus`.
    Caus,

    /// Repeatability, `repeat`.
    Repeat,

    /// Next-observation prediction, `predict`.
    Predict,
}

impl AuxTask {
    /// Identifier of the task in configurations and statistics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tc => "tc",
            Self::Prop => "prop",
            Self::Caus => "caus",
            Self::Repeat => "repeat",
            Self::Predict => "predict",
        }
    }

    /// Returns `true` if the task compares with an unrelated transition.
    pub fn needs_unrelated(&self) -> bool {
        matches!(self, Self::Prop | Self::Caus | Self::Repeat)
    }
}

impl FromStr for AuxTask {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tc" => Ok(Self::Tc),
            "prop" => Ok(Self::Prop),
            "caus" => Ok(Self::Caus),
            "repeat" => Ok(Self::Repeat),
            "predict" => Ok(Self::Predict),
            _ => Err(AgentError::UnknownAuxTask(s.to_string())),
        }
    }
}

impl fmt::Display for AuxTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Representations shaped by the auxiliary tasks.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AuxApply {
    /// The representation of the actor.
    Actor,

    /// The representation of the critic.
    Critic,

    /// Both representations.
    Both,
}

/// Configuration of the auxiliary tasks.
///
/// ```rust
/// use auxrl_candle_agent::auxiliary::{AuxApply, AuxConfig};
///
/// let config = AuxConfig::default()
///     .apply(AuxApply::Critic)
///     .task("caus", 1.0)
///     .task("predict", 0.5);
/// assert_eq!(config.validate().unwrap().len(), 2);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct AuxConfig {
    /// Representations the tasks apply to.
    pub apply: AuxApply,

    /// Task identifiers, among `tc`, `prop`, `caus`, `repeat` and `predict`.
    pub tasks: Vec<String>,

    /// Weight of each task.
    pub lambdas: BTreeMap<String, f64>,

    /// Decay rate `k` of the similarity `exp(-k x)`.
    #[serde(default = "default_similarity_decay")]
    pub similarity_decay: f64,
}

fn default_similarity_decay() -> f64 {
    10.0
}

impl Default for AuxConfig {
    fn default() -> Self {
        Self {
            apply: AuxApply::Both,
            tasks: vec![],
            lambdas: BTreeMap::new(),
            similarity_decay: default_similarity_decay(),
        }
    }
}

impl AuxConfig {
    /// Sets the representations the tasks apply to.
    pub fn apply(mut self, v: AuxApply) -> Self {
        self.apply = v;
        self
    }

    /// Adds a task with its weight.
    pub fn task(mut self, name: &str, lambda: f64) -> Self {
        self.tasks.push(name.to_string());
        self.lambdas.insert(name.to_string(), lambda);
        self
    }

    /// Sets the decay rate of the similarity.
    pub fn similarity_decay(mut self, v: f64) -> Self {
        self.similarity_decay = v;
        self
    }

    /// Parses the tasks and checks that each is known, unique and weighted.
    pub fn validate(&self) -> Result<Vec<(AuxTask, f64)>> {
        let mut tasks: Vec<(AuxTask, f64)> = vec![];
        for name in self.tasks.iter() {
            let task = name.parse::<AuxTask>()?;
            if tasks.iter().any(|(t, _)| *t == task) {
                return Err(AgentError::DuplicateAuxTask(name.clone()).into());
            }
            let lambda = *self
                .lambdas
                .get(name)
                .ok_or_else(|| AgentError::MissingAuxLambda(name.clone()))?;
            tasks.push((task, lambda));
        }
        Ok(tasks)
    }
}
