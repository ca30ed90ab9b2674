//! Kinematic-wave overland flow
//!
//! Discharge is routed cell by cell, highest first, once per timestep. The
//! outgoing discharge of a cell solves the implicit finite-difference form of
//! the kinematic-wave equation
//!
//! ```text
//! dt/dL * q + alpha * q^β0 = dt/dL * q_up + alpha * q_last^β0 + dt/2 * (r + r_last)
//! ```
//!
//! with Newton-Raphson ([`NewtonSolver`]). `alpha` comes from Manning's
//! roughness and the steepest downslope gradient and is fixed for the whole
//! simulation, as are the flow routes and travel lengths.
//!
//! Reference:
//! Johnson, D.L., Miller, A.C. (1997). A spatially distributed hydrologic
//! model utilizing raster data structures. *Computers & Geosciences*, 23(3),
//! 267–272.

use accuflow_core::{Direction, Error, GridAccess, NoProgress, Progress, Raster, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::routing::{FlowRoute, Gradients, RoutingMethod};
use super::sorted_index::SortedIndex;
use crate::maybe_rayon::*;

/// Exponent of the power-law stage-discharge relation
pub const BETA_0: f64 = 3.0 / 5.0;
/// `BETA_0 - 1`, exponent of its derivative
pub const BETA_1: f64 = BETA_0 - 1.0;
/// Upper bound for the roughness coefficient `alpha`
pub const ALPHA_MAX: f64 = 10.0;
/// Smallest Manning roughness accepted
pub const MIN_ROUGHNESS: f64 = 0.001;

/// `alpha = min((n / sqrt(max_gradient))^β0, ALPHA_MAX)`.
///
/// Flat cells (no downslope gradient) get `ALPHA_MAX`.
pub fn kinematic_alpha(roughness: f64, max_gradient: f64) -> f64 {
    let n = roughness.max(MIN_ROUGHNESS);
    if max_gradient <= 0.0 {
        return ALPHA_MAX;
    }
    (n / max_gradient.sqrt()).powf(BETA_0).min(ALPHA_MAX)
}

/// Everything the solver needs to know about one cell at one timestep.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KinematicCell {
    /// Inflow deposited by upstream cells this step
    pub q_up: f64,
    /// The cell's own discharge last step
    pub q_last: f64,
    pub alpha: f64,
    /// Travel length through the cell
    pub length: f64,
    /// Lateral inflow this step
    pub r: f64,
    /// Lateral inflow last step
    pub r_last: f64,
}

/// How a solve ended. Does not affect the returned discharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// `|Δq|` dropped below epsilon
    Converged,
    /// Iteration budget used up; the last estimate was returned
    Exhausted,
    /// The estimate reached `q <= 0`; the rainfall-only term was returned
    DryFallback,
}

/// Bounded Newton-Raphson iteration for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonSolver {
    pub max_iterations: usize,
    pub epsilon: f64,
}

impl Default for NewtonSolver {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            epsilon: 1e-4,
        }
    }
}

impl NewtonSolver {
    pub fn new(max_iterations: usize, epsilon: f64) -> Self {
        Self { max_iterations, epsilon }
    }

    /// Outgoing discharge of `cell` after a timestep of `dt` seconds.
    pub fn solve(&self, cell: &KinematicCell, dt: f64) -> f64 {
        self.solve_traced(cell, dt).0
    }

    /// [`solve`](Self::solve) plus how the iteration ended.
    pub fn solve_traced(&self, cell: &KinematicCell, dt: f64) -> (f64, SolveStatus) {
        let KinematicCell { q_up, q_last, alpha, length, r, r_last } = *cell;

        let dt_dl = dt / length;
        let d_r = dt / 2.0 * (r + r_last);

        // Linearised first guess around the mean of old and upstream discharge.
        let mut q = if q_last + q_up != 0.0 {
            let slope = alpha * BETA_0 * ((q_last + q_up) / 2.0).powf(BETA_1);
            (dt_dl * q_up + q_last * slope + d_r) / (dt_dl + slope)
        } else {
            d_r
        };

        let c = dt_dl * q_up + alpha * q_last.powf(BETA_0) + d_r;
        let mut status = SolveStatus::Exhausted;

        for _ in 0..self.max_iterations {
            if q <= 0.0 {
                return (d_r, SolveStatus::DryFallback);
            }

            let residual = dt_dl * q + alpha * q.powf(BETA_0) - c;
            let d_residual = dt_dl + alpha * BETA_0 * q.powf(BETA_1);
            let dq = residual / d_residual;
            q -= dq;

            if dq.abs() < self.epsilon {
                status = SolveStatus::Converged;
                break;
            }
        }

        (q.max(0.0), status)
    }
}

/// Where the initial water column is placed
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecipitationDistribution {
    #[default]
    Homogeneous,
    /// Only cells at or above this elevation
    AboveElevation(f64),
    /// Only the western half of the grid
    LeftHalf,
}

/// Initial precipitation event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Precipitation {
    /// Depth in millimetres
    pub depth_mm: f64,
    pub distribution: PrecipitationDistribution,
}

impl Default for Precipitation {
    fn default() -> Self {
        Self {
            depth_mm: 10.0,
            distribution: PrecipitationDistribution::Homogeneous,
        }
    }
}

impl Precipitation {
    /// Initial discharge (m) at a valid cell.
    fn initial_flow(&self, z: f64, col: usize, cols: usize) -> f64 {
        let depth = self.depth_mm / 1000.0;
        let wet = match self.distribution {
            PrecipitationDistribution::Homogeneous => true,
            PrecipitationDistribution::AboveElevation(threshold) => z >= threshold,
            PrecipitationDistribution::LeftHalf => col <= cols / 2,
        };
        if wet {
            depth
        } else {
            0.0
        }
    }
}

/// Parameters for the kinematic-wave simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicWaveParams {
    /// Manning roughness used where no roughness grid value exists
    pub roughness: f64,
    /// Optional per-cell roughness
    #[serde(skip)]
    pub roughness_grid: Option<Raster<f64>>,
    /// Simulated time in hours
    pub time_span: f64,
    /// Timestep in minutes
    pub time_step: f64,
    pub solver: NewtonSolver,
    pub routing: RoutingMethod,
    pub precipitation: Precipitation,
    /// Constant lateral inflow in mm/h
    pub rain_rate: f64,
    /// Hours from the start during which `rain_rate` applies
    pub rain_duration: f64,
    /// Cells to record hydrographs at; `None` picks border outlets
    pub gauges: Option<Vec<(usize, usize)>>,
}

impl Default for KinematicWaveParams {
    fn default() -> Self {
        Self {
            roughness: 0.03,
            roughness_grid: None,
            time_span: 1.0,
            time_step: 1.0,
            solver: NewtonSolver::default(),
            routing: RoutingMethod::D8,
            precipitation: Precipitation::default(),
            rain_rate: 0.0,
            rain_duration: 0.0,
            gauges: None,
        }
    }
}

impl KinematicWaveParams {
    fn validate(&self, shape: (usize, usize)) -> Result<()> {
        let invalid = |name: &'static str, value: f64, reason: &str| Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if !(self.time_step > 0.0) {
            return Err(invalid("time_step", self.time_step, "must be positive"));
        }
        if !(self.time_span >= 0.0) {
            return Err(invalid("time_span", self.time_span, "must not be negative"));
        }
        if !(self.solver.epsilon >= 0.0) {
            return Err(invalid("epsilon", self.solver.epsilon, "must not be negative"));
        }
        if self.rain_rate < 0.0 {
            return Err(invalid("rain_rate", self.rain_rate, "must not be negative"));
        }
        if let Some(grid) = &self.roughness_grid {
            Error::check_shape(shape, grid.shape())?;
        }
        if let Some(gauges) = &self.gauges {
            for &(row, col) in gauges {
                if row >= shape.0 || col >= shape.1 {
                    return Err(Error::IndexOutOfBounds {
                        row,
                        col,
                        rows: shape.0,
                        cols: shape.1,
                    });
                }
            }
        }
        Ok(())
    }

    /// Timestep in seconds
    pub fn dt(&self) -> f64 {
        self.time_step * 60.0
    }

    /// Number of sweeps for `t = 0, Δt, …` up to and including `time_span`.
    pub fn step_count(&self) -> usize {
        let step_hours = self.time_step / 60.0;
        (self.time_span / step_hours + 1e-9).floor() as usize + 1
    }

    /// Lateral inflow (m/s) during the sweep at `hours`
    fn rain_at(&self, hours: f64) -> f64 {
        if hours < self.rain_duration {
            self.rain_rate / 1000.0 / 3600.0
        } else {
            0.0
        }
    }
}

/// Discharge recorded at the gauges, one row per timestep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hydrograph {
    pub gauges: Vec<(usize, usize)>,
    /// (time in hours, discharge per gauge)
    pub rows: Vec<(f64, Vec<f64>)>,
}

impl Hydrograph {
    /// Discharge series of one gauge
    pub fn series(&self, gauge: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|(_, q)| q.get(gauge).copied()).collect()
    }
}

/// Water balance of a run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KinematicWaveSummary {
    pub steps: usize,
    pub completed: bool,
    /// Initial discharge summed over the grid
    pub initial: f64,
    /// Discharge summed over the grid after the last step
    pub stored: f64,
    /// `q * dt` routed across the grid edge
    pub outflow: f64,
    /// Solves that used up the iteration budget
    pub unconverged: usize,
}

impl KinematicWaveSummary {
    /// `initial - (stored + outflow)`
    pub fn loss(&self) -> f64 {
        self.initial - (self.stored + self.outflow)
    }

    /// Loss as a percentage of the initial discharge, 0 on a dry start
    pub fn balance_percent(&self) -> f64 {
        if self.initial > 0.0 {
            self.loss() * 100.0 / self.initial
        } else {
            0.0
        }
    }
}

/// Result of [`KinematicWave::run`]
#[derive(Debug, Clone)]
pub struct KinematicWaveOutput {
    pub flow: Raster<f64>,
    pub hydrograph: Hydrograph,
    pub summary: KinematicWaveSummary,
}

/// Per-cell coefficients, fixed at initialisation.
#[derive(Debug, Clone, Copy)]
struct CellModel {
    route: FlowRoute,
    alpha: f64,
    length: f64,
}

/// Kinematic-wave simulation over a DEM.
#[derive(Debug, Clone)]
pub struct KinematicWave {
    params: KinematicWaveParams,
    index: SortedIndex,
    cells: Array2<CellModel>,
    /// Discharge, NaN outside the DEM
    flow: Raster<f64>,
    flow_last: Array2<f64>,
    gauges: Vec<(usize, usize)>,
    rain_last: f64,
    steps: usize,
    initial: f64,
    outflow: f64,
    unconverged: usize,
}

impl KinematicWave {
    /// Build routes and coefficients from `dem` and place the initial
    /// precipitation.
    pub fn new(dem: &Raster<f64>, params: KinematicWaveParams) -> Result<Self> {
        let (rows, cols) = dem.shape();
        params.validate((rows, cols))?;
        let index = SortedIndex::build(dem)?;

        let routing = params.routing;
        let roughness = params.roughness;
        let roughness_grid = params.roughness_grid.as_ref();

        // Rows are independent here.
        let models: Vec<Vec<CellModel>> = (0..rows)
            .into_par_iter()
            .map(|row| {
                (0..cols)
                    .map(|col| cell_model(dem, roughness_grid, roughness, routing, row, col))
                    .collect()
            })
            .collect();

        let cells = Array2::from_shape_vec((rows, cols), models.into_iter().flatten().collect())
            .map_err(|e| Error::Other(e.to_string()))?;

        let mut flow = dem.like(0.0);
        flow.set_nodata(Some(f64::NAN));
        let mut initial = 0.0;
        for row in 0..rows {
            for col in 0..cols {
                match dem.valid_value(row, col) {
                    Some(z) => {
                        let q = params.precipitation.initial_flow(z, col, cols);
                        flow.set_value(row, col, q);
                        initial += q;
                    }
                    None => flow.set_nodata_cell(row, col),
                }
            }
        }

        let gauges = match &params.gauges {
            Some(g) => g.clone(),
            None => outlet_gauges(dem),
        };

        debug!(
            cells = index.len(),
            gauges = gauges.len(),
            routing = ?routing,
            initial,
            "kinematic wave initialised"
        );

        Ok(Self {
            flow_last: Array2::zeros((rows, cols)),
            params,
            index,
            cells,
            flow,
            gauges,
            rain_last: 0.0,
            steps: 0,
            initial,
            outflow: 0.0,
            unconverged: 0,
        })
    }

    /// Current discharge grid
    pub fn flow(&self) -> &Raster<f64> {
        &self.flow
    }

    pub fn gauges(&self) -> &[(usize, usize)] {
        &self.gauges
    }

    /// Simulated time of the next sweep, in hours
    pub fn time(&self) -> f64 {
        self.steps as f64 * self.params.time_step / 60.0
    }

    /// One timestep: every cell, highest first.
    pub fn step(&mut self) {
        let dt = self.params.dt();
        let r = self.params.rain_at(self.time());
        let r_last = self.rain_last;
        let solver = self.params.solver;

        // flow_last must be complete before the sweep reads it.
        for (last, current) in self.flow_last.iter_mut().zip(self.flow.data_mut().iter_mut()) {
            if current.is_nan() {
                *last = 0.0;
            } else {
                *last = *current;
                *current = 0.0;
            }
        }

        let d_r = dt / 2.0 * (r + r_last);
        let mut unconverged = 0;
        for (row, col) in self.index.iter() {
            let model = self.cells[(row, col)];
            let q_up = self.flow.value(row, col);

            // Pits keep their own water on top of the inflow.
            if model.route.is_pit() {
                let q = q_up + self.flow_last[(row, col)] + d_r;
                self.flow.set_value(row, col, q.max(0.0));
                continue;
            }

            let cell = KinematicCell {
                q_up,
                q_last: self.flow_last[(row, col)],
                alpha: model.alpha,
                length: model.length,
                r,
                r_last,
            };
            let (q, status) = solver.solve_traced(&cell, dt);
            if status == SolveStatus::Exhausted {
                unconverged += 1;
            }
            self.flow.set_value(row, col, q);

            let shares = model.route.shares(q);
            for dir in Direction::ALL {
                let share = shares[dir.index()];
                if share <= 0.0 {
                    continue;
                }
                match self.flow.neighbor(dir, row, col) {
                    Some((nr, nc)) => self.flow.add_value(nr, nc, share),
                    None => self.outflow += share * dt,
                }
            }
        }

        if unconverged > 0 {
            debug!(step = self.steps, unconverged, "solves hit the iteration limit");
        }
        self.unconverged += unconverged;
        self.rain_last = r;
        self.steps += 1;
    }

    fn gauge_readings(&self) -> Vec<f64> {
        self.gauges
            .iter()
            .map(|&(row, col)| self.flow.value(row, col))
            .collect()
    }

    /// Run all timesteps, polling `progress` between them.
    pub fn run<P: Progress + ?Sized>(&mut self, progress: &mut P) -> KinematicWaveOutput {
        let total = self.params.step_count();
        let mut hydrograph = Hydrograph {
            gauges: self.gauges.clone(),
            rows: Vec::with_capacity(total),
        };
        let mut completed = true;

        for k in 0..total {
            if !progress.proceed(k, total) {
                completed = false;
                break;
            }
            let time = self.time();
            self.step();
            hydrograph.rows.push((time, self.gauge_readings()));
        }

        let summary = KinematicWaveSummary {
            steps: self.steps,
            completed,
            initial: self.initial,
            stored: self.flow.sum(),
            outflow: self.outflow,
            unconverged: self.unconverged,
        };

        info!(
            steps = summary.steps,
            initial = summary.initial,
            stored = summary.stored,
            outflow = summary.outflow,
            loss = summary.loss(),
            balance = %format!("{:.2}%", summary.balance_percent()),
            "kinematic wave finished"
        );
        if summary.unconverged > 0 {
            warn!(
                count = summary.unconverged,
                "Newton iteration did not converge within {} iterations",
                self.params.solver.max_iterations
            );
        }

        KinematicWaveOutput {
            flow: self.flow.clone(),
            hydrograph,
            summary,
        }
    }
}

fn cell_model(
    dem: &Raster<f64>,
    roughness_grid: Option<&Raster<f64>>,
    roughness: f64,
    routing: RoutingMethod,
    row: usize,
    col: usize,
) -> CellModel {
    if dem.is_nodata_cell(row, col) {
        return CellModel { route: FlowRoute::Pit, alpha: ALPHA_MAX, length: 0.0 };
    }

    let gradients = Gradients::scan(dem, row, col, |r, c| !dem.is_nodata_cell(r, c));
    let route = routing.route(&gradients);

    let n = roughness_grid
        .and_then(|g| g.valid_value(row, col))
        .unwrap_or(roughness);

    CellModel {
        route,
        alpha: kinematic_alpha(n, gradients.max_slope()),
        length: route.travel_length(dem),
    }
}

/// Border cells without a lower in-grid neighbour, row-major.
pub fn outlet_gauges(dem: &Raster<f64>) -> Vec<(usize, usize)> {
    let (rows, cols) = dem.shape();
    let mut gauges = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            let Some(z) = dem.valid_value(row, col) else {
                continue;
            };
            let mut border = false;
            let mut lowest = true;
            for dir in Direction::ALL {
                match dem.neighbor(dir, row, col) {
                    None => border = true,
                    Some((nr, nc)) => {
                        if dem.valid_value(nr, nc).is_some_and(|zn| zn < z) {
                            lowest = false;
                        }
                    }
                }
            }
            if border && lowest {
                gauges.push((row, col));
            }
        }
    }

    gauges
}

/// Run a complete simulation without progress reporting.
pub fn kinematic_wave(dem: &Raster<f64>, params: KinematicWaveParams) -> Result<KinematicWaveOutput> {
    let mut sim = KinematicWave::new(dem, params)?;
    Ok(sim.run(&mut NoProgress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use accuflow_core::GeoTransform;
    use approx::assert_relative_eq;

    fn ramp(rows: usize, cols: usize, cell: f64) -> Raster<f64> {
        let mut values = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            for col in 0..cols {
                values.push(100.0 - col as f64 * cell * 0.05);
            }
        }
        let mut dem = Raster::from_vec(values, rows, cols).unwrap();
        dem.set_transform(GeoTransform::new(0.0, rows as f64 * cell, cell, -cell));
        dem
    }

    #[test]
    fn test_solver_dry_cell_returns_zero() {
        let cell = KinematicCell { alpha: 1.0, length: 10.0, ..Default::default() };
        let (q, status) = NewtonSolver::default().solve_traced(&cell, 60.0);
        assert_eq!(q, 0.0);
        assert_eq!(status, SolveStatus::DryFallback);
    }

    #[test]
    fn test_solver_guard_returns_rain_term_exactly() {
        // Negative lateral term drives the first estimate below zero.
        let cell = KinematicCell {
            alpha: 2.0,
            length: 30.0,
            r: -0.25,
            r_last: 0.05,
            ..Default::default()
        };
        let dt = 60.0;
        let (q, status) = NewtonSolver::default().solve_traced(&cell, dt);
        assert_eq!(q, dt / 2.0 * (-0.25 + 0.05));
        assert_eq!(status, SolveStatus::DryFallback);
    }

    #[test]
    fn test_solver_converges_to_root() {
        let cell = KinematicCell {
            q_up: 0.5,
            q_last: 0.2,
            alpha: 1.0,
            length: 10.0,
            ..Default::default()
        };
        let dt = 60.0;
        let solver = NewtonSolver::new(100, 1e-12);
        let (q, status) = solver.solve_traced(&cell, dt);

        assert_eq!(status, SolveStatus::Converged);
        let dt_dl = dt / cell.length;
        let lhs = dt_dl * q + cell.alpha * q.powf(BETA_0);
        let rhs = dt_dl * cell.q_up + cell.alpha * cell.q_last.powf(BETA_0);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-9);
        assert!(q > cell.q_last && q < cell.q_up);
    }

    #[test]
    fn test_solver_exhausted_keeps_estimate() {
        let cell = KinematicCell {
            q_up: 1.0,
            q_last: 0.4,
            alpha: 3.0,
            length: 25.0,
            ..Default::default()
        };
        let exhausted = NewtonSolver::new(3, 0.0);
        let (q, status) = exhausted.solve_traced(&cell, 60.0);
        assert_eq!(status, SolveStatus::Exhausted);
        assert!(q >= 0.0 && q.is_finite());
        assert_eq!(exhausted.solve(&cell, 60.0), q);
    }

    #[test]
    fn test_solver_never_negative() {
        let solver = NewtonSolver::default();
        for &(q_up, q_last, alpha) in &[(0.0, 1.0, 10.0), (3.0, 0.0, 0.01), (1e-6, 1e-6, 5.0), (0.0, 0.001, 0.1)] {
            let cell = KinematicCell { q_up, q_last, alpha, length: 1.0, ..Default::default() };
            assert!(solver.solve(&cell, 600.0) >= 0.0);
        }
    }

    #[test]
    fn test_alpha_clamped() {
        assert_eq!(kinematic_alpha(0.03, 0.0), ALPHA_MAX);
        assert_eq!(kinematic_alpha(5.0, 1e-9), ALPHA_MAX);
        assert_relative_eq!(kinematic_alpha(0.03, 1.0), 0.03_f64.powf(BETA_0), epsilon = 1e-12);
        // Roughness floor
        assert_relative_eq!(kinematic_alpha(0.0, 4.0), (0.001_f64 / 2.0).powf(BETA_0), epsilon = 1e-12);
    }

    #[test]
    fn test_step_count() {
        let params = KinematicWaveParams::default();
        assert_eq!(params.step_count(), 61);
        assert_eq!(params.dt(), 60.0);

        let zero = KinematicWaveParams { time_span: 0.0, ..Default::default() };
        assert_eq!(zero.step_count(), 1);
    }

    #[test]
    fn test_outlet_gauges_on_ramp() {
        let dem = ramp(3, 4, 10.0);
        assert_eq!(outlet_gauges(&dem), vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_ramp_drains_over_the_edge() {
        let dem = ramp(4, 6, 10.0);
        let params = KinematicWaveParams {
            time_span: 0.5,
            ..Default::default()
        };

        let out = kinematic_wave(&dem, params).unwrap();

        assert!(out.summary.completed);
        assert_eq!(out.summary.steps, 31);
        assert_relative_eq!(out.summary.initial, 24.0 * 0.01, epsilon = 1e-12);
        assert!(out.summary.outflow > 0.0);
        assert!(out.flow.data().iter().all(|q| q.is_finite() && *q >= 0.0));

        assert_eq!(out.hydrograph.gauges.len(), 4);
        assert_eq!(out.hydrograph.rows.len(), 31);
        assert_eq!(out.hydrograph.rows[0].0, 0.0);
        assert_relative_eq!(out.hydrograph.rows[30].0, 0.5, epsilon = 1e-12);
        assert!(out.hydrograph.series(0).iter().any(|&q| q > 0.0));
    }

    #[test]
    fn test_dry_grid_stays_dry() {
        let dem = ramp(3, 3, 1.0);
        let params = KinematicWaveParams {
            precipitation: Precipitation { depth_mm: 0.0, ..Default::default() },
            routing: RoutingMethod::Mfd,
            time_span: 0.1,
            ..Default::default()
        };

        let out = kinematic_wave(&dem, params).unwrap();
        assert!(out.flow.data().iter().all(|&q| q == 0.0));
        assert_eq!(out.summary.outflow, 0.0);
    }

    #[test]
    fn test_rain_feeds_dry_grid() {
        let dem = ramp(3, 3, 1.0);
        let params = KinematicWaveParams {
            precipitation: Precipitation { depth_mm: 0.0, ..Default::default() },
            rain_rate: 36.0,
            rain_duration: 1.0,
            time_span: 0.1,
            ..Default::default()
        };

        let out = kinematic_wave(&dem, params).unwrap();
        assert!(out.flow.data().iter().any(|&q| q > 0.0));
    }

    #[test]
    fn test_precipitation_distributions() {
        let dem = ramp(2, 5, 10.0);
        let params = KinematicWaveParams {
            precipitation: Precipitation {
                depth_mm: 20.0,
                distribution: PrecipitationDistribution::LeftHalf,
            },
            ..Default::default()
        };
        let sim = KinematicWave::new(&dem, params).unwrap();
        let flow = sim.flow();
        assert_eq!(flow.get(0, 2).unwrap(), 0.02);
        assert_eq!(flow.get(0, 3).unwrap(), 0.0);

        let params = KinematicWaveParams {
            precipitation: Precipitation {
                depth_mm: 5.0,
                distribution: PrecipitationDistribution::AboveElevation(99.8),
            },
            ..Default::default()
        };
        let sim = KinematicWave::new(&dem, params).unwrap();
        assert_eq!(sim.flow().get(1, 0).unwrap(), 0.005);
        assert_eq!(sim.flow().get(1, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_nodata_cells_stay_nodata() {
        let mut dem = ramp(3, 4, 10.0);
        dem.set(1, 1, f64::NAN).unwrap();

        let out = kinematic_wave(&dem, KinematicWaveParams { time_span: 0.1, ..Default::default() }).unwrap();
        assert!(out.flow.get(1, 1).unwrap().is_nan());
        assert!(out.flow.get(1, 2).unwrap().is_finite());
    }

    fn bowl() -> Raster<f64> {
        let mut values = vec![2.0; 9];
        values[4] = 0.0;
        let mut dem = Raster::from_vec(values, 3, 3).unwrap();
        dem.set_transform(GeoTransform::new(0.0, 30.0, 10.0, -10.0));
        dem
    }

    #[test]
    fn test_pit_keeps_its_water() {
        let dem = bowl();
        let mut sim = KinematicWave::new(&dem, KinematicWaveParams::default()).unwrap();
        assert_eq!(sim.flow().value(1, 1), 0.01);

        for _ in 0..10 {
            let before = sim.flow().value(1, 1);
            sim.step();

            // Every rim cell drains into the centre.
            let mut inflow = 0.0;
            for row in 0..3 {
                for col in 0..3 {
                    if (row, col) != (1, 1) {
                        inflow += sim.flow().value(row, col);
                    }
                }
            }
            let after = sim.flow().value(1, 1);
            assert!(after >= before);
            assert_relative_eq!(after, before + inflow, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_closed_bowl_balance() {
        let out = kinematic_wave(&bowl(), KinematicWaveParams { time_span: 0.25, ..Default::default() })
            .unwrap();
        let s = out.summary;

        assert_eq!(s.outflow, 0.0);
        assert!(out.flow.value(1, 1) > 0.01);
        assert_relative_eq!(s.stored, out.flow.sum(), epsilon = 1e-12);
        assert_relative_eq!(s.loss(), s.initial - s.stored, epsilon = 1e-12);
    }

    #[test]
    fn test_summary_loss() {
        let s = KinematicWaveSummary {
            initial: 1.0,
            stored: 0.6,
            outflow: 0.3,
            ..Default::default()
        };
        assert_relative_eq!(s.loss(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(s.balance_percent(), 10.0, epsilon = 1e-9);
        assert_eq!(KinematicWaveSummary::default().balance_percent(), 0.0);
    }

    #[test]
    fn test_cancel_between_steps() {
        let dem = ramp(3, 4, 10.0);
        let mut sim = KinematicWave::new(&dem, KinematicWaveParams::default()).unwrap();
        let mut two_steps = |done: usize, _: usize| done < 2;

        let out = sim.run(&mut two_steps);
        assert!(!out.summary.completed);
        assert_eq!(out.summary.steps, 2);
        assert_eq!(out.hydrograph.rows.len(), 2);
    }

    #[test]
    fn test_invalid_parameters() {
        let dem = ramp(3, 3, 1.0);

        let params = KinematicWaveParams { time_step: 0.0, ..Default::default() };
        assert!(matches!(
            KinematicWave::new(&dem, params),
            Err(Error::InvalidParameter { name: "time_step", .. })
        ));

        let params = KinematicWaveParams {
            roughness_grid: Some(Raster::filled(2, 2, 0.05)),
            ..Default::default()
        };
        assert!(matches!(KinematicWave::new(&dem, params), Err(Error::SizeMismatch { .. })));

        let params = KinematicWaveParams { gauges: Some(vec![(3, 0)]), ..Default::default() };
        assert!(matches!(KinematicWave::new(&dem, params), Err(Error::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_d8_and_mfd_rerun_identically() {
        let dem = ramp(4, 4, 5.0);
        for routing in [RoutingMethod::D8, RoutingMethod::Mfd] {
            let params = KinematicWaveParams { routing, time_span: 0.2, ..Default::default() };
            let a = kinematic_wave(&dem, params.clone()).unwrap();
            let b = kinematic_wave(&dem, params).unwrap();
            let bits = |r: &Raster<f64>| r.data().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(&a.flow), bits(&b.flow));
        }
    }
}
