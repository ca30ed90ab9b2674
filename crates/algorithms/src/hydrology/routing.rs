//! Flow-direction selection: D8 steepest descent or Freeman (1991) MFD
//!
//! For each cell the downslope gradient toward all eight neighbours is
//! computed once ([`Gradients`]). A [`FlowRoute`] then either sends
//! everything to the steepest neighbour (D8) or spreads it over all
//! downslope neighbours with weights `gradient^1.1` (MFD).
//!
//! Grid edges: a neighbour outside the grid has no elevation, so the
//! gradient toward it mirrors the gradient from the opposite in-grid
//! neighbour. Flux routed that way leaves the grid at this cell and is never
//! redistributed among the in-grid neighbours.
//!
//! Reference:
//! Freeman, T.G. (1991). Calculating catchment area with divergent flow
//! based on a regular grid. *Computers & Geosciences*, 17(3), 413–422.

use accuflow_core::{Direction, GridAccess};
use serde::{Deserialize, Serialize};

/// Convergence exponent applied to gradients in MFD mode (Freeman 1991).
pub const MFD_CONVERGENCE: f64 = 1.1;

/// Downslope gradients from one cell toward its eight neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gradients {
    /// `(z - z_neighbour) / length` when positive, else 0
    pub slope: [f64; 8],
    /// Direction points outside the grid
    pub off_grid: [bool; 8],
}

impl Gradients {
    /// Scan the neighbours of (row, col) in direction order.
    ///
    /// `is_valid` decides whether an in-grid neighbour may receive flow;
    /// invalid neighbours get a zero gradient.
    pub fn scan<G, F>(surface: &G, row: usize, col: usize, is_valid: F) -> Self
    where
        G: GridAccess + ?Sized,
        F: Fn(usize, usize) -> bool,
    {
        let z = surface.value(row, col);
        let mut slope = [0.0_f64; 8];
        let mut off_grid = [false; 8];

        for dir in Direction::ALL {
            let i = dir.index();
            let drop = match surface.neighbor(dir, row, col) {
                Some((nr, nc)) => {
                    if is_valid(nr, nc) {
                        z - surface.value(nr, nc)
                    } else {
                        0.0
                    }
                }
                None => {
                    off_grid[i] = true;
                    match surface.neighbor(dir.opposite(), row, col) {
                        Some((or, oc)) if is_valid(or, oc) => surface.value(or, oc) - z,
                        _ => 0.0,
                    }
                }
            };

            if drop > 0.0 {
                slope[i] = drop / surface.neighbor_length(dir);
            }
        }

        Self { slope, off_grid }
    }

    /// Same gradients with every off-grid direction dropped.
    pub fn in_grid_only(mut self) -> Self {
        for i in 0..8 {
            if self.off_grid[i] {
                self.slope[i] = 0.0;
            }
        }
        self
    }

    /// No downslope direction at all
    pub fn is_pit(&self) -> bool {
        self.slope.iter().all(|&s| s <= 0.0)
    }

    /// Largest downslope gradient, 0 for pits
    pub fn max_slope(&self) -> f64 {
        self.slope.iter().copied().fold(0.0, f64::max)
    }
}

/// Switch between MFD and D8 on a per-cell control value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingParams {
    /// Route as D8 where the control value exceeds `threshold_linear`.
    pub use_d8_switch: bool,
    /// Control value above which flow becomes linear (D8).
    pub threshold_linear: f64,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            use_d8_switch: false,
            threshold_linear: 0.0,
        }
    }
}

/// Fixed routing for tools that do not switch per cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMethod {
    #[default]
    D8,
    Mfd,
}

impl RoutingMethod {
    pub fn route(self, gradients: &Gradients) -> FlowRoute {
        match self {
            RoutingMethod::D8 => FlowRoute::steepest(gradients),
            RoutingMethod::Mfd => FlowRoute::dispersed(gradients),
        }
    }
}

impl std::str::FromStr for RoutingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d8" => Ok(RoutingMethod::D8),
            "mfd" => Ok(RoutingMethod::Mfd),
            other => Err(format!("unknown routing '{}' (expected d8 or mfd)", other)),
        }
    }
}

/// Where a cell sends its outgoing flux.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowRoute {
    /// No downslope neighbour: flux stays at the cell.
    Pit,
    /// Everything to one neighbour.
    Single(Direction),
    /// Fractions per direction code, summing to 1.
    Multiple([f64; 8]),
}

impl FlowRoute {
    /// D8: the steepest direction, first one in scan order on ties.
    pub fn steepest(gradients: &Gradients) -> Self {
        let mut best: Option<Direction> = None;
        let mut max = 0.0_f64;

        for dir in Direction::ALL {
            let s = gradients.slope[dir.index()];
            if s > max {
                max = s;
                best = Some(dir);
            }
        }

        best.map_or(FlowRoute::Pit, FlowRoute::Single)
    }

    /// MFD: every downslope direction weighted by `gradient^MFD_CONVERGENCE`.
    pub fn dispersed(gradients: &Gradients) -> Self {
        let mut weights = [0.0_f64; 8];
        let mut sum = 0.0;

        for (w, &s) in weights.iter_mut().zip(gradients.slope.iter()) {
            if s > 0.0 {
                *w = s.powf(MFD_CONVERGENCE);
                sum += *w;
            }
        }

        if sum <= 0.0 {
            return FlowRoute::Pit;
        }

        for w in weights.iter_mut() {
            *w /= sum;
        }
        FlowRoute::Multiple(weights)
    }

    /// D8 when the switch is on and `control > threshold_linear`, MFD otherwise.
    pub fn select(gradients: &Gradients, control: f64, params: &RoutingParams) -> Self {
        if params.use_d8_switch && control > params.threshold_linear {
            Self::steepest(gradients)
        } else {
            Self::dispersed(gradients)
        }
    }

    pub fn is_pit(&self) -> bool {
        matches!(self, FlowRoute::Pit)
    }

    /// Fraction of the outgoing flux sent toward `dir`.
    pub fn fraction(&self, dir: Direction) -> f64 {
        match self {
            FlowRoute::Pit => 0.0,
            FlowRoute::Single(d) => {
                if *d == dir {
                    1.0
                } else {
                    0.0
                }
            }
            FlowRoute::Multiple(w) => w[dir.index()],
        }
    }

    /// Split `flux` over the eight directions. For any route other than
    /// [`FlowRoute::Pit`] the shares add up to `flux`.
    pub fn shares(&self, flux: f64) -> [f64; 8] {
        let mut out = [0.0_f64; 8];
        match self {
            FlowRoute::Pit => {}
            FlowRoute::Single(d) => out[d.index()] = flux,
            FlowRoute::Multiple(w) => {
                for (o, &f) in out.iter_mut().zip(w.iter()) {
                    *o = flux * f;
                }
            }
        }
        out
    }

    /// Flow length through the cell: the neighbour distance for D8, the
    /// fraction-weighted mean distance for MFD, 0 for pits.
    pub fn travel_length<G: GridAccess + ?Sized>(&self, grid: &G) -> f64 {
        match self {
            FlowRoute::Pit => 0.0,
            FlowRoute::Single(d) => grid.neighbor_length(*d),
            FlowRoute::Multiple(w) => Direction::ALL
                .iter()
                .map(|&d| w[d.index()] * grid.neighbor_length(d))
                .sum(),
        }
    }
}
