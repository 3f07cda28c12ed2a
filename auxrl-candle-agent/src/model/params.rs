//! Named collections of trainable parameters.
use crate::{error::AgentError, util::track};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use std::path::{Path, PathBuf};

/// A parameter with its full name, `<set>.<layer>.<tensor>`.
pub type NamedVar = (String, Var);

/// A named [`VarMap`].
///
/// Cloning a [`ParamSet`] gives another handle to the same storage. Parameter
/// updates through [`Var::set`] are visible from every handle and from every
/// layer built on the set.
#[derive(Clone)]
pub struct ParamSet {
    name: String,
    varmap: VarMap,
    device: Device,
}

impl ParamSet {
    /// Creates an empty set.
    pub fn new(name: impl Into<String>, device: &Device) -> Self {
        Self {
            name: name.into(),
            varmap: VarMap::new(),
            device: device.clone(),
        }
    }

    /// Name of the set.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device holding the parameters.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns a [`VarBuilder`] creating parameters in this set.
    pub fn var_builder(&self) -> VarBuilder {
        VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device)
    }

    /// Parameters sorted by name.
    pub fn named_vars(&self) -> Result<Vec<NamedVar>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| AgentError::PoisonedParams(self.name.clone()))?;
        let mut vars = data
            .iter()
            .map(|(k, v)| (format!("{}.{}", self.name, k), v.clone()))
            .collect::<Vec<_>>();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// Returns the parameter stored under `key`, e.g. `output.weight`.
    pub fn get(&self, key: &str) -> Result<Var> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| AgentError::PoisonedParams(self.name.clone()))?;
        data.get(key)
            .cloned()
            .with_context(|| format!("{} has no parameter {}", self.name, key))
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> Result<usize> {
        Ok(self
            .named_vars()?
            .iter()
            .map(|(_, v)| v.elem_count())
            .sum())
    }

    /// Soft update, `self = tau * src + (1 - tau) * self`. `tau = 1` copies.
    pub fn track(&self, src: &ParamSet, tau: f64) -> Result<()> {
        track(&self.varmap, &src.varmap, tau)
            .with_context(|| format!("{} <- {}", self.name, src.name))
    }

    /// Sets every parameter to `f(key, src_value)`.
    ///
    /// Both sets must contain the same keys.
    pub fn assign_from<F>(&self, src: &ParamSet, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &Tensor) -> Result<Tensor>,
    {
        let src_vars = src.named_vars()?;
        let dest_vars = self.named_vars()?;
        if src_vars.len() != dest_vars.len() {
            return Err(AgentError::ParamMismatch {
                src: src.name.clone(),
                dest: self.name.clone(),
                detail: format!("{} vs {} tensors", src_vars.len(), dest_vars.len()),
            }
            .into());
        }

        // Both lists are sorted by the key following the set name.
        for ((k_src, v_src), (k_dest, v_dest)) in src_vars.iter().zip(dest_vars.iter()) {
            let key = &k_src[src.name.len() + 1..];
            if key != &k_dest[self.name.len() + 1..] {
                return Err(AgentError::ParamMismatch {
                    src: src.name.clone(),
                    dest: self.name.clone(),
                    detail: format!("{} vs {}", k_src, k_dest),
                }
                .into());
            }
            v_dest.set(&f(key, v_src.as_tensor())?)?;
        }
        Ok(())
    }

    fn path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.safetensors", self.name))
    }

    /// Saves the parameters in `dir/<name>.safetensors`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path(dir.as_ref());
        self.varmap.save(&path)?;
        info!("Save {}", path.display());
        Ok(path)
    }

    /// Loads the parameters from `dir/<name>.safetensors`.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let path = self.path(dir.as_ref());
        self.varmap
            .load(&path)
            .with_context(|| format!("loading {}", path.display()))?;
        info!("Load {}", path.display());
        Ok(())
    }
}
