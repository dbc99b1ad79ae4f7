//! Robust loss evaluation.
//!
//! Backends apply the loss themselves; this is the `f64` form used to report
//! costs consistently across backends.

use crate::ir::RobustLoss;

impl RobustLoss {
    /// Robust loss `rho(s)` of a squared residual norm `s`.
    pub fn rho(self, s: f64) -> f64 {
        match self {
            RobustLoss::None => s,
            RobustLoss::Huber { scale } => {
                let delta2 = scale * scale;
                if s <= delta2 {
                    s
                } else {
                    2.0 * scale * s.sqrt() - delta2
                }
            }
            RobustLoss::Cauchy { scale } => {
                let c2 = scale * scale;
                c2 * (1.0 + s / c2).ln()
            }
        }
    }

    /// `true` when a residual of squared norm `s` lies in the quadratic region.
    pub fn is_inlier(self, s: f64) -> bool {
        match self {
            RobustLoss::None => true,
            RobustLoss::Huber { scale } | RobustLoss::Cauchy { scale } => s <= scale * scale,
        }
    }
}
