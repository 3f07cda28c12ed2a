//! Combination of auxiliary losses over representation owners.
use super::{tasks, AuxApply, AuxConfig, AuxTask};
use crate::{
    error::AgentError,
    model::{Actor, Critic, NamedVar, ParamSet, Predictor, Representation, SubModel1},
    util::normalize_loss,
};
use anyhow::{anyhow, Result};
use candle_core::Tensor;
use log::info;
use std::collections::BTreeMap;

/// Normalized inputs of the auxiliary losses.
///
/// The `*100` and `*101` fields come from the unrelated sample and are needed
/// by `prop`, `caus` and `repeat` only.
pub struct AuxInputs {
    pub obs0: Tensor,
    pub obs1: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub obs100: Option<Tensor>,
    pub obs101: Option<Tensor>,
    pub actions100: Option<Tensor>,
    pub rewards100: Option<Tensor>,
}

/// Output of [`AuxEngine::compute`].
pub struct AuxLosses {
    /// Sum of the normalized losses divided by `2 * n_tasks`.
    pub total: Tensor,

    /// Weighted loss of each task for the first owner, in configuration order.
    pub per_task: Vec<(AuxTask, f32)>,
}

/// A representation shaped by the auxiliary tasks.
struct Owner {
    name: String,
    repr: Representation,
    repr_params: ParamSet,
    predictor: Option<Predictor>,
}

/// Embeddings of an owner, each computed at most once per step.
struct Embeddings {
    s0: Tensor,
    s1: Option<Tensor>,
    s100: Option<Tensor>,
    s101: Option<Tensor>,
}

fn field<'a>(t: &'a Option<Tensor>, name: &'static str) -> Result<&'a Tensor> {
    t.as_ref()
        .ok_or_else(|| AgentError::MissingBatchField(name).into())
}

/// Computes the combined auxiliary loss.
///
/// The engine is built once from an [`AuxConfig`]. For every owner selected by
/// [`AuxApply`], each task adds `normalize_loss(lambda * loss)` to the total;
/// the total is then divided by `2 * n_tasks`.
pub struct AuxEngine {
    tasks: Vec<(AuxTask, f64)>,
    decay: f64,
    owners: Vec<Owner>,
    vars: Vec<NamedVar>,
}

impl AuxEngine {
    /// Validates the configuration and attaches predictors if `predict` is active.
    pub fn build(
        config: &AuxConfig,
        actor: &Actor,
        critic: &Critic,
        act_dim: usize,
    ) -> Result<Self> {
        let tasks = config.validate()?;
        if tasks.is_empty() {
            return Ok(Self {
                tasks,
                decay: config.similarity_decay,
                owners: vec![],
                vars: vec![],
            });
        }

        let names = tasks.iter().map(|(t, _)| t.name()).collect::<Vec<_>>();
        info!("aux_tasks: {:?}", names);

        let with_predictor = tasks.iter().any(|(t, _)| *t == AuxTask::Predict);
        let mut owners = vec![];
        let mut add_owner = |name: &str, repr: &Representation, params: &ParamSet| -> Result<()> {
            for t in names.iter() {
                info!("{} - aux task: {}", name, t);
            }
            let predictor = match with_predictor {
                true => Some(Predictor::attach(name, repr, params, act_dim)?),
                false => None,
            };
            owners.push(Owner {
                name: name.to_string(),
                repr: repr.clone(),
                repr_params: params.clone(),
                predictor,
            });
            Ok(())
        };
        if matches!(config.apply, AuxApply::Actor | AuxApply::Both) {
            add_owner(actor.name(), actor.representation(), actor.repr_params())?;
        }
        if matches!(config.apply, AuxApply::Critic | AuxApply::Both) {
            add_owner(critic.name(), critic.representation(), critic.repr_params())?;
        }

        // Union over owners, without duplicates.
        let mut vars = BTreeMap::new();
        for owner in owners.iter() {
            let owned = match &owner.predictor {
                Some(p) => p.trainable_parameters()?,
                None => owner.repr_params.named_vars()?,
            };
            vars.extend(owned);
        }
        let vars = vars.into_iter().collect::<Vec<_>>();
        info!("  aux params: {}", vars.iter().map(|(_, v)| v.elem_count()).sum::<usize>());

        Ok(Self {
            tasks,
            decay: config.similarity_decay,
            owners,
            vars,
        })
    }

    /// Returns `true` if no task is configured.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns `true` if some task needs the unrelated sample.
    pub fn needs_unrelated(&self) -> bool {
        self.tasks.iter().any(|(t, _)| t.needs_unrelated())
    }

    /// Parameters receiving the auxiliary gradient.
    pub fn parameters(&self) -> &[NamedVar] {
        &self.vars
    }

    /// Attached predictors.
    pub fn predictors(&self) -> impl Iterator<Item = &Predictor> {
        self.owners.iter().filter_map(|o| o.predictor.as_ref())
    }

    fn embeddings(&self, owner: &Owner, inputs: &AuxInputs) -> Result<Embeddings> {
        let uses = |f: fn(&AuxTask) -> bool| self.tasks.iter().any(|(t, _)| f(t));
        let s1 = uses(|t| matches!(t, AuxTask::Tc | AuxTask::Prop | AuxTask::Repeat));
        let s100 = uses(|t| t.needs_unrelated());
        let s101 = uses(|t| matches!(t, AuxTask::Prop | AuxTask::Repeat));

        Ok(Embeddings {
            s0: owner.repr.forward(&inputs.obs0)?,
            s1: match s1 {
                true => Some(owner.repr.forward(&inputs.obs1)?),
                false => None,
            },
            s100: match s100 {
                true => Some(owner.repr.forward(field(&inputs.obs100, "obs100")?)?),
                false => None,
            },
            s101: match s101 {
                true => Some(owner.repr.forward(field(&inputs.obs101, "obs101")?)?),
                false => None,
            },
        })
    }

    fn task_loss(
        &self,
        task: AuxTask,
        owner: &Owner,
        e: &Embeddings,
        inputs: &AuxInputs,
    ) -> Result<Tensor> {
        let k = self.decay;
        let a = &inputs.actions;
        match task {
            AuxTask::Tc => tasks::temporal_coherence(&e.s0, field(&e.s1, "obs1")?, a, k),
            AuxTask::Prop => tasks::proportionality(
                &e.s0,
                field(&e.s1, "obs1")?,
                field(&e.s100, "obs100")?,
                field(&e.s101, "obs101")?,
                a,
                field(&inputs.actions100, "actions100")?,
                k,
            ),
            AuxTask::Caus => tasks::causality(
                &e.s0,
                field(&e.s100, "obs100")?,
                a,
                field(&inputs.actions100, "actions100")?,
                &inputs.rewards,
                field(&inputs.rewards100, "rewards100")?,
                k,
            ),
            AuxTask::Repeat => tasks::repeatability(
                &e.s0,
                field(&e.s1, "obs1")?,
                field(&e.s100, "obs100")?,
                field(&e.s101, "obs101")?,
                a,
                field(&inputs.actions100, "actions100")?,
                k,
            ),
            AuxTask::Predict => {
                let predictor = owner
                    .predictor
                    .as_ref()
                    .ok_or_else(|| anyhow!("{} has no predictor", owner.name))?;
                tasks::prediction(&predictor.forward(&inputs.obs0, a)?, &inputs.obs1)
            }
        }
    }

    /// Computes the combined loss, or `None` if no task is configured.
    pub fn compute(&self, inputs: &AuxInputs) -> Result<Option<AuxLosses>> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut total: Option<Tensor> = None;
        let mut per_task = vec![];
        for (i, owner) in self.owners.iter().enumerate() {
            let e = self.embeddings(owner, inputs)?;
            for &(task, lambda) in self.tasks.iter() {
                let loss = self.task_loss(task, owner, &e, inputs)?.affine(lambda, 0.)?;
                if i == 0 {
                    per_task.push((task, loss.to_scalar::<f32>()?));
                }
                let loss = normalize_loss(&loss)?;
                total = Some(match total {
                    Some(t) => (t + loss)?,
                    None => loss,
                });
            }
        }

        match total {
            Some(total) => {
                let denom = 2.0 * self.tasks.len() as f64;
                Ok(Some(AuxLosses {
                    total: total.affine(1.0 / denom, 0.)?,
                    per_task,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ActorConfig, CriticConfig};
    use candle_core::Device;

    fn networks(device: &Device) -> Result<(Actor, Critic)> {
        Ok((
            Actor::build("actor", 4, 2, &ActorConfig::default(), device)?,
            Critic::build("critic", 4, 2, &CriticConfig::default(), device)?,
        ))
    }

    fn inputs(device: &Device, unrelated: bool) -> Result<AuxInputs> {
        let randn = |d: usize| Tensor::randn(0f32, 1f32, (6, d), device);
        let opt = |d: usize| -> Result<Option<Tensor>> {
            match unrelated {
                true => Ok(Some(randn(d)?)),
                false => Ok(None),
            }
        };
        Ok(AuxInputs {
            obs0: randn(4)?,
            obs1: randn(4)?,
            actions: randn(2)?,
            rewards: randn(1)?,
            obs100: opt(4)?,
            obs101: opt(4)?,
            actions100: opt(2)?,
            rewards100: opt(1)?,
        })
    }

    #[test]
    fn test_empty_engine_is_noop() -> Result<()> {
        let device = Device::Cpu;
        let (actor, critic) = networks(&device)?;
        let engine = AuxEngine::build(&AuxConfig::default(), &actor, &critic, 2)?;
        assert!(engine.is_empty());
        assert!(engine.parameters().is_empty());
        assert!(engine.compute(&inputs(&device, false)?)?.is_none());
        Ok(())
    }

    #[test]
    fn test_single_task_denominator() -> Result<()> {
        let device = Device::Cpu;
        let (actor, critic) = networks(&device)?;
        let config = AuxConfig::default().apply(AuxApply::Actor).task("tc", 0.3);
        let engine = AuxEngine::build(&config, &actor, &critic, 2)?;
        let inputs = inputs(&device, false)?;

        let losses = engine.compute(&inputs)?.unwrap();
        let s0 = actor.representation().forward(&inputs.obs0)?;
        let s1 = actor.representation().forward(&inputs.obs1)?;
        let own = tasks::temporal_coherence(&s0, &s1, &inputs.actions, 10.0)?.affine(0.3, 0.)?;
        let expected = normalize_loss(&own)?.to_scalar::<f32>()? / 2.0;

        assert!((losses.total.to_scalar::<f32>()? - expected).abs() < 1e-6);
        assert_eq!(losses.per_task.len(), 1);
        assert!((losses.per_task[0].1 - own.to_scalar::<f32>()?).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_gradients_stay_in_representations() -> Result<()> {
        let device = Device::Cpu;
        let (actor, critic) = networks(&device)?;
        let config = AuxConfig::default()
            .task("tc", 1.0)
            .task("prop", 1.0)
            .task("caus", 1.0)
            .task("repeat", 1.0)
            .task("predict", 1.0);
        let engine = AuxEngine::build(&config, &actor, &critic, 2)?;
        assert!(engine.needs_unrelated());

        let names = engine
            .parameters()
            .iter()
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        assert!(names.iter().all(|k| k.starts_with("actor_repr.")
            || k.starts_with("critic_repr.")
            || k.starts_with("actor_pred.")
            || k.starts_with("critic_pred.")));
        // Eight tensors per representation and six per predictor head.
        assert_eq!(names.len(), 2 * 8 + 2 * 6);

        let losses = engine.compute(&inputs(&device, true)?)?.unwrap();
        let grads = losses.total.backward()?;
        for (k, var) in actor
            .trainable_parameters()?
            .into_iter()
            .chain(critic.trainable_parameters()?)
        {
            let is_head = k.starts_with("actor.") || k.starts_with("critic.");
            assert_eq!(grads.get(var.as_tensor()).is_some(), !is_head, "{}", k);
        }
        Ok(())
    }

    #[test]
    fn test_missing_unrelated_sample() -> Result<()> {
        let device = Device::Cpu;
        let (actor, critic) = networks(&device)?;
        let config = AuxConfig::default().task("caus", 1.0);
        let engine = AuxEngine::build(&config, &actor, &critic, 2)?;
        let err = engine.compute(&inputs(&device, false)?).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::MissingBatchField(_))
        ));
        Ok(())
    }
}
