//   Copyright 2025 The mh-bart Authors
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

//! mh_bart implements Bayesian Additive Regression Trees (BART): a
//! sum-of-trees model where priors regularize inference so that no single
//! tree explains the data on its own. Posterior samples of the ensemble,
//! the leaf parameters, and the residual variance are drawn by a
//! Metropolis-Hastings sampler whose proposals modify tree topology
//! (BIRTH, DEATH, SWAP, CHANGE), following Chipman, George, and McCulloch
//! [1998]. Continuous responses are rescaled internally; binary responses
//! are handled through probit latent-variable augmentation following
//! Albert and Chib [1993].

pub mod config;
pub mod data;
pub mod error;
pub mod fit;
mod io;
pub mod math;
pub mod node;
pub mod priors;
pub mod proposals;
pub mod results;
pub mod sampling;
pub mod tree;

pub use config::{
    CallbackInfo, Control, Data, EndNodeModel, Model, ResidualVariancePriorOptions,
    SampleCallback, TreePriorOptions,
};
pub use data::{DataScale, DataSet, VariableType};
pub use error::BartError;
pub use fit::{BartFit, SamplerState};
pub use results::Results;
