//! Backend-independent intermediate representation of the bundle problem.

mod types;

pub use types::{
    Bound, FactorKind, FixedMask, ParamBlock, ParamId, ProblemIR, ResidualBlock, RobustLoss,
};
