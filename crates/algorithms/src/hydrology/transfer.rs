//! Flux/state transfer functions
//!
//! An [`Operation`] turns the material available at a cell into the part
//! that moves downstream (`flux`) and the part that stays (`state`). The
//! operation is chosen once per pass; `control` is read per cell from the
//! control grid.
//!
//! | Operation | flux | state |
//! |---|---|---|
//! | Accumulate | `flux_in` | 0 |
//! | Capacity | `min(flux_in, control)` | `max(flux_in - control, 0)` |
//! | Fraction | `flux_in * control` | `flux_in * (1 - control)` |
//! | Threshold | `flux_in - control` above threshold, else 0 | `control` above threshold, else `flux_in` |
//! | Trigger | `flux_in` above trigger, else 0 | 0 above trigger, else `flux_in` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result of one transfer-function application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    /// Amount leaving the cell this step
    pub flux: f64,
    /// Amount retained at the cell
    pub state: f64,
}

/// Accumulation operation applied at every cell of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Plain flow accumulation, no retention
    #[default]
    Accumulate,
    /// At most `control` leaves the cell
    Capacity,
    /// The fraction `control` leaves the cell
    Fraction,
    /// Only the excess over `control` leaves the cell
    Threshold,
    /// Nothing leaves until `control` is exceeded, then everything does
    Trigger,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Accumulate,
        Operation::Capacity,
        Operation::Fraction,
        Operation::Threshold,
        Operation::Trigger,
    ];

    /// Whether the operation reads a control grid
    pub fn requires_control(self) -> bool {
        !matches!(self, Operation::Accumulate)
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Accumulate => "accumulate",
            Operation::Capacity => "capacity",
            Operation::Fraction => "fraction",
            Operation::Threshold => "threshold",
            Operation::Trigger => "trigger",
        }
    }

    /// Split `flux_in` into outgoing flux and retained state.
    pub fn apply(self, flux_in: f64, control: f64) -> Transfer {
        match self {
            Operation::Accumulate => Transfer { flux: flux_in, state: 0.0 },
            Operation::Capacity => Transfer {
                flux: flux_in.min(control),
                state: (flux_in - control).max(0.0),
            },
            Operation::Fraction => Transfer {
                flux: flux_in * control,
                state: flux_in * (1.0 - control),
            },
            Operation::Threshold => {
                if flux_in > control {
                    Transfer { flux: flux_in - control, state: control }
                } else {
                    Transfer { flux: 0.0, state: flux_in }
                }
            }
            Operation::Trigger => {
                if flux_in > control {
                    Transfer { flux: flux_in, state: 0.0 }
                } else {
                    Transfer { flux: 0.0, state: flux_in }
                }
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accumulate" | "accuflux" => Ok(Operation::Accumulate),
            "capacity" | "accucapacity" => Ok(Operation::Capacity),
            "fraction" | "accufraction" => Ok(Operation::Fraction),
            "threshold" | "accuthreshold" => Ok(Operation::Threshold),
            "trigger" | "accutrigger" => Ok(Operation::Trigger),
            other => Err(format!(
                "unknown operation '{}' (expected accumulate, capacity, fraction, threshold or trigger)",
                other
            )),
        }
    }
}
