//! Networks of the agent.
//!
//! Parameters are held by [`ParamSet`]s, each a named [`VarMap`](candle_nn::VarMap).
//! An [`Actor`] or a [`Critic`] owns two sets: one for its [`Representation`]
//! (`<name>_repr`) and one for its head (`<name>`). A [`Predictor`] does not own a
//! representation; it evaluates the representation of the network it is attached to.
mod actor;
mod critic;
mod layers;
mod params;
mod predictor;
mod representation;
pub use actor::{Actor, ActorConfig, ActorHead};
pub use critic::{Critic, CriticConfig, CriticHead};
pub use params::{NamedVar, ParamSet};
pub use predictor::{Predictor, PredictorHead};
pub use representation::{Representation, RepresentationConfig};

use anyhow::Result;
use candle_nn::VarBuilder;

/// Neural network model not owing its [`VarMap`] internally.
///
/// [`VarMap`]: candle_nn::VarMap
pub trait SubModel1: Sized {
    /// Configuration from which [`SubModel1`] is constructed.
    type Config;

    /// Input of the [`SubModel1`].
    type Input;

    /// Output of the [`SubModel1`].
    type Output;

    /// Builds [`SubModel1`] with [`VarBuilder`] and [`SubModel1::Config`].
    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self>;

    /// A generalized forward function.
    fn forward(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Neural network model not owing its [`VarMap`] internally.
///
/// The difference from [`SubModel1`] is that this trait takes two inputs.
///
/// [`VarMap`]: candle_nn::VarMap
pub trait SubModel2: Sized {
    /// Configuration from which [`SubModel2`] is constructed.
    type Config;

    /// Input of the [`SubModel2`].
    type Input1;

    /// Input of the [`SubModel2`].
    type Input2;

    /// Output of the [`SubModel2`].
    type Output;

    /// Builds [`SubModel2`].
    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self>;

    /// A generalized forward function.
    fn forward(&self, input1: &Self::Input1, input2: &Self::Input2) -> Result<Self::Output>;
}

/// Returns `true` for parameters of layer normalization.
pub(crate) fn is_layer_norm(key: &str) -> bool {
    key.rsplit('.')
        .nth(1)
        .map_or(false, |layer| layer.starts_with("ln"))
}
