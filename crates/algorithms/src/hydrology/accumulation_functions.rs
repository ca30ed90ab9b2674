//! Accumulation functions: routed flux with capacity/fraction/threshold/trigger limits
//!
//! Cells are processed once, from highest to lowest elevation. At each cell
//! the available material is
//!
//! ```text
//! flux_in = input + state_in + everything deposited by upstream cells
//! ```
//!
//! The selected [`Operation`] splits it into outgoing flux and retained
//! state, and the outgoing flux is handed to the downslope neighbours by MFD
//! (optionally switching to D8 above a threshold, see [`RoutingParams`]).
//!
//! The flux grid doubles as the upstream accumulator: before a cell is
//! visited it holds what has been deposited into it, afterwards its own
//! outgoing flux. A cancelled pass therefore leaves a consistent partial
//! result.

use accuflow_core::{Algorithm, Direction, Error, GridAccess, NoProgress, Progress, Raster, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::routing::{FlowRoute, Gradients, RoutingParams};
use super::sorted_index::SortedIndex;
use super::transfer::Operation;

/// Input grids of an accumulation pass. All must share the surface's shape.
#[derive(Debug)]
pub struct AccumulationInputs<'a, G: GridAccess = Raster<f64>> {
    /// Elevation surface that drives the routing (read-only)
    pub surface: &'a G,
    /// Material injected at each cell
    pub input: &'a G,
    /// Retained state of a previous pass, merged into `flux_in`
    pub state_in: Option<&'a G>,
    /// Per-cell operation parameter; required unless accumulating
    pub control: Option<&'a G>,
    /// Value compared against the linear-flow threshold instead of the flux
    pub linear_control: Option<&'a G>,
}

impl<G: GridAccess> Clone for AccumulationInputs<'_, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G: GridAccess> Copy for AccumulationInputs<'_, G> {}

impl<'a, G: GridAccess> AccumulationInputs<'a, G> {
    pub fn new(surface: &'a G, input: &'a G) -> Self {
        Self {
            surface,
            input,
            state_in: None,
            control: None,
            linear_control: None,
        }
    }

    pub fn with_state(mut self, state_in: &'a G) -> Self {
        self.state_in = Some(state_in);
        self
    }

    pub fn with_control(mut self, control: &'a G) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_linear_control(mut self, linear_control: &'a G) -> Self {
        self.linear_control = Some(linear_control);
        self
    }

    /// Configuration checks that must pass before any output is touched.
    fn validate(&self, operation: Operation) -> Result<()> {
        let shape = self.surface.shape();
        Error::check_shape(shape, self.input.shape())?;

        for grid in [self.state_in, self.control, self.linear_control].into_iter().flatten() {
            Error::check_shape(shape, grid.shape())?;
        }

        if operation.requires_control() && self.control.is_none() {
            return Err(Error::MissingInput {
                name: "control",
                reason: format!("required by the {} operation", operation),
            });
        }

        Ok(())
    }

    /// Cells that take part in routing: elevation, input and (when the
    /// operation needs it) control all hold data.
    fn valid_mask(&self, operation: Operation) -> Array2<bool> {
        let (rows, cols) = self.surface.shape();
        let control = self.control.filter(|_| operation.requires_control());

        Array2::from_shape_fn((rows, cols), |(row, col)| {
            !self.surface.is_nodata_cell(row, col)
                && !self.input.is_nodata_cell(row, col)
                && control.map_or(true, |c| !c.is_nodata_cell(row, col))
        })
    }
}

/// Parameters for an accumulation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationParams {
    pub operation: Operation,
    pub routing: RoutingParams,
}

/// What a pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassSummary {
    /// Ranks visited before the pass ended
    pub processed: usize,
    /// Ranks in the index
    pub total: usize,
    /// False when the progress predicate cancelled the pass
    pub completed: bool,
    /// Outgoing flux of cells that route nowhere (pits)
    pub pit_flux: f64,
    /// Flux routed across the grid edge
    pub outflow: f64,
}

/// Route one accumulation pass over caller-owned output grids.
///
/// `flux_out` receives the outgoing flux per cell, `state_out` (if given)
/// the retained state. Cells where the surface, input or required control
/// is no-data get no-data in both outputs and receive nothing from upstream.
///
/// `index` must have been built from `inputs.surface`. `progress` is polled
/// before every rank; returning `false` ends the pass with
/// `completed == false`.
pub fn route_accumulation<G, O, P>(
    inputs: &AccumulationInputs<'_, G>,
    index: &SortedIndex,
    params: &AccumulationParams,
    flux_out: &mut O,
    mut state_out: Option<&mut O>,
    progress: &mut P,
) -> Result<PassSummary>
where
    G: GridAccess,
    O: GridAccess,
    P: Progress + ?Sized,
{
    let operation = params.operation;
    inputs.validate(operation)?;
    index.check_surface(inputs.surface)?;

    let shape = inputs.surface.shape();
    Error::check_shape(shape, flux_out.shape())?;
    if let Some(state) = state_out.as_deref() {
        Error::check_shape(shape, state.shape())?;
    }

    let valid = inputs.valid_mask(operation);

    // Outputs double as accumulators, so they start at zero.
    let (rows, cols) = shape;
    for row in 0..rows {
        for col in 0..cols {
            if valid[(row, col)] {
                flux_out.set_value(row, col, 0.0);
                if let Some(state) = state_out.as_deref_mut() {
                    state.set_value(row, col, 0.0);
                }
            } else {
                flux_out.set_nodata_cell(row, col);
                if let Some(state) = state_out.as_deref_mut() {
                    state.set_nodata_cell(row, col);
                }
            }
        }
    }

    debug!(
        operation = %operation,
        cells = index.len(),
        d8_switch = params.routing.use_d8_switch,
        "accumulation pass started"
    );

    let mut summary = PassSummary {
        total: index.len(),
        completed: true,
        ..PassSummary::default()
    };

    for (rank, (row, col)) in index.iter().enumerate() {
        if !progress.proceed(rank, summary.total) {
            summary.completed = false;
            break;
        }
        summary.processed = rank + 1;

        if !valid[(row, col)] {
            continue;
        }

        let mut flux_in = inputs.input.value(row, col) + flux_out.value(row, col);
        if let Some(v) = inputs.state_in.and_then(|s| s.valid_value(row, col)) {
            flux_in += v;
        }

        let control = match inputs.control {
            Some(c) if operation.requires_control() => c.value(row, col),
            _ => 0.0,
        };

        let transfer = operation.apply(flux_in, control);
        flux_out.set_value(row, col, transfer.flux);
        if let Some(state) = state_out.as_deref_mut() {
            state.set_value(row, col, transfer.state);
        }

        let linear = match inputs.linear_control {
            // No-data never switches to D8.
            Some(l) => l.valid_value(row, col).unwrap_or(f64::NEG_INFINITY),
            None => transfer.flux,
        };

        let gradients = Gradients::scan(inputs.surface, row, col, |r, c| valid[(r, c)]);
        let route = FlowRoute::select(&gradients, linear, &params.routing);

        if route.is_pit() {
            summary.pit_flux += transfer.flux;
            continue;
        }

        let shares = route.shares(transfer.flux);
        for dir in Direction::ALL {
            let share = shares[dir.index()];
            if share == 0.0 {
                continue;
            }
            if gradients.off_grid[dir.index()] {
                summary.outflow += share;
            } else if let Some((nr, nc)) = inputs.surface.neighbor(dir, row, col) {
                flux_out.add_value(nr, nc, share);
            }
        }
    }

    debug!(
        processed = summary.processed,
        completed = summary.completed,
        pit_flux = summary.pit_flux,
        outflow = summary.outflow,
        "accumulation pass finished"
    );

    Ok(summary)
}

/// Rasters produced by [`accumulation_functions`]
#[derive(Debug, Clone)]
pub struct AccumulationOutput {
    pub flux: Raster<f64>,
    /// Present for every operation except [`Operation::Accumulate`]
    pub state: Option<Raster<f64>>,
    pub summary: PassSummary,
}

/// Run a full accumulation pass, allocating the output rasters.
///
/// # Arguments
/// * `inputs` - Surface, input and optional state/control/linear-control grids
/// * `params` - Operation and D8 switch
///
/// # Returns
/// Flux raster (NaN no-data), state raster for limiting operations, and the
/// pass summary.
pub fn accumulation_functions(
    inputs: &AccumulationInputs<'_>,
    params: AccumulationParams,
) -> Result<AccumulationOutput> {
    accumulation_functions_with_progress(inputs, params, &mut NoProgress)
}

/// [`accumulation_functions`] with a progress/cancel predicate.
pub fn accumulation_functions_with_progress<P: Progress + ?Sized>(
    inputs: &AccumulationInputs<'_>,
    params: AccumulationParams,
    progress: &mut P,
) -> Result<AccumulationOutput> {
    inputs.validate(params.operation)?;
    let index = SortedIndex::build(inputs.surface)?;

    let mut flux = inputs.surface.like(0.0);
    flux.set_nodata(Some(f64::NAN));
    let mut state = params.operation.requires_control().then(|| flux.clone());

    let summary = route_accumulation(inputs, &index, &params, &mut flux, state.as_mut(), progress)?;

    Ok(AccumulationOutput { flux, state, summary })
}

/// Owned input rasters, for driving the pass through [`Algorithm`].
#[derive(Debug, Clone)]
pub struct AccumulationRasters {
    pub surface: Raster<f64>,
    pub input: Raster<f64>,
    pub state_in: Option<Raster<f64>>,
    pub control: Option<Raster<f64>>,
    pub linear_control: Option<Raster<f64>>,
}

impl AccumulationRasters {
    pub fn as_inputs(&self) -> AccumulationInputs<'_> {
        AccumulationInputs {
            surface: &self.surface,
            input: &self.input,
            state_in: self.state_in.as_ref(),
            control: self.control.as_ref(),
            linear_control: self.linear_control.as_ref(),
        }
    }
}

/// Accumulation functions tool
#[derive(Debug, Clone, Default)]
pub struct AccumulationFunctions;

impl Algorithm for AccumulationFunctions {
    type Input = AccumulationRasters;
    type Output = AccumulationOutput;
    type Params = AccumulationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Accumulation Functions"
    }

    fn description(&self) -> &'static str {
        "Route material downslope with accumulate, capacity, fraction, threshold or trigger limits"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        accumulation_functions(&input.as_inputs(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accuflow_core::GeoTransform;
    use approx::assert_relative_eq;

    fn raster(values: Vec<f64>, rows: usize, cols: usize) -> Raster<f64> {
        let mut r = Raster::from_vec(values, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        r
    }

    /// Cone with its lowest point in the middle: a closed drainage basin.
    fn cone(size: usize) -> Raster<f64> {
        let c = (size / 2) as f64;
        let mut values = Vec::with_capacity(size * size);
        for row in 0..size {
            for col in 0..size {
                let (dr, dc) = (row as f64 - c, col as f64 - c);
                values.push((dr * dr + dc * dc).sqrt() * 10.0);
            }
        }
        raster(values, size, size)
    }

    #[test]
    fn test_bowl_center_collects_everything() {
        let mut values = vec![5.0; 9];
        values[4] = 1.0;
        let dem = raster(values, 3, 3);
        let input = dem.like(1.0);

        let out = accumulation_functions(&AccumulationInputs::new(&dem, &input), AccumulationParams::default())
            .unwrap();

        for row in 0..3 {
            for col in 0..3 {
                let expected = if (row, col) == (1, 1) { 9.0 } else { 1.0 };
                assert_relative_eq!(out.flux.get(row, col).unwrap(), expected, epsilon = 1e-12);
            }
        }
        assert!(out.state.is_none());
        assert!(out.summary.completed);
        assert_relative_eq!(out.summary.pit_flux, 9.0, epsilon = 1e-12);
        assert_eq!(out.summary.outflow, 0.0);
    }

    #[test]
    fn test_capacity_single_source() {
        let dem = raster(vec![2.0, 1.0], 1, 2);
        let input = raster(vec![10.0, 0.0], 1, 2);
        let control = raster(vec![4.0, 100.0], 1, 2);
        let params = AccumulationParams { operation: Operation::Capacity, ..Default::default() };

        let inputs = AccumulationInputs::new(&dem, &input).with_control(&control);
        let out = accumulation_functions(&inputs, params).unwrap();
        let state = out.state.unwrap();

        assert_eq!(out.flux.get(0, 0).unwrap(), 4.0);
        assert_eq!(state.get(0, 0).unwrap(), 6.0);
        // Downstream cell received the 4 units and holds them below capacity.
        assert_eq!(out.flux.get(0, 1).unwrap(), 4.0);
        assert_eq!(state.get(0, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_conservation_closed_basin() {
        let dem = cone(7);
        let input = dem.like(1.0);

        let out = accumulation_functions(&AccumulationInputs::new(&dem, &input), AccumulationParams::default())
            .unwrap();

        assert_eq!(out.summary.outflow, 0.0);
        assert_relative_eq!(out.summary.pit_flux, 49.0, epsilon = 1e-9);
        assert_relative_eq!(out.flux.get(3, 3).unwrap(), 49.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mass_balance_with_outflow() {
        // Plane tilted to the south-east: flux leaves over the edges.
        let mut values = Vec::new();
        for row in 0..6 {
            for col in 0..6 {
                values.push(100.0 - 3.0 * row as f64 - 2.0 * col as f64);
            }
        }
        let dem = raster(values, 6, 6);
        let input = dem.like(0.5);

        let out = accumulation_functions(&AccumulationInputs::new(&dem, &input), AccumulationParams::default())
            .unwrap();

        assert!(out.summary.outflow > 0.0);
        assert_relative_eq!(out.summary.pit_flux + out.summary.outflow, 18.0, epsilon = 1e-9);
    }

    #[test]
    fn test_partition_on_every_cell() {
        let dem = cone(5);
        let input = dem.like(2.0);
        let control = dem.like(0.3);
        let state_in = dem.like(0.25);

        for operation in [Operation::Capacity, Operation::Fraction, Operation::Threshold] {
            let inputs = AccumulationInputs::new(&dem, &input)
                .with_control(&control)
                .with_state(&state_in);
            let params = AccumulationParams { operation, ..Default::default() };

            // Reconstruct flux_in from the routed totals: shares into each cell
            // equal the upstream flux, so run a pass and check flux + state
            // against input + state_in + inflow computed independently.
            let out = accumulation_functions(&inputs, params).unwrap();
            let state = out.state.unwrap();
            let index = SortedIndex::build(&dem).unwrap();
            let mut inflow = dem.like(0.0);

            for (row, col) in index.iter() {
                let flux_in = 2.0 + 0.25 + inflow.get(row, col).unwrap();
                let f = out.flux.get(row, col).unwrap();
                let s = state.get(row, col).unwrap();
                assert!(
                    (f + s - flux_in).abs() < 1e-9,
                    "{}: flux {} + state {} != {} at ({}, {})",
                    operation, f, s, flux_in, row, col
                );

                let g = Gradients::scan(&dem, row, col, |_, _| true);
                let shares = FlowRoute::dispersed(&g).shares(f);
                for dir in Direction::ALL {
                    if let Some((nr, nc)) = dem.neighbor(dir, row, col) {
                        if !g.off_grid[dir.index()] {
                            inflow.add_value(nr, nc, shares[dir.index()]);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_nodata_propagation() {
        // Ramp sloping east, one input cell missing in the middle.
        let dem = raster(vec![5.0, 4.0, 3.0, 2.0, 1.0], 1, 5);
        let mut input = dem.like(1.0);
        input.set(0, 2, f64::NAN).unwrap();
        let control = dem.like(10.0);

        let inputs = AccumulationInputs::new(&dem, &input).with_control(&control);
        let params = AccumulationParams { operation: Operation::Capacity, ..Default::default() };
        let out = accumulation_functions(&inputs, params).unwrap();
        let state = out.state.unwrap();

        assert!(out.flux.get(0, 2).unwrap().is_nan());
        assert!(state.get(0, 2).unwrap().is_nan());
        // Upstream cells have nowhere to go: (0,1) becomes a pit.
        assert_eq!(out.flux.get(0, 1).unwrap(), 2.0);
        // Downstream of the gap only local input arrives.
        assert_eq!(out.flux.get(0, 3).unwrap(), 1.0);
        assert_eq!(out.flux.get(0, 4).unwrap(), 2.0);
    }

    #[test]
    fn test_surface_nodata_splits_the_ramp() {
        let dem = raster(vec![5.0, 4.0, f64::NAN, 2.0, 1.0], 1, 5);
        let input = dem.like(1.0);
        let control = dem.like(10.0);

        let inputs = AccumulationInputs::new(&dem, &input).with_control(&control);
        let params = AccumulationParams { operation: Operation::Capacity, ..Default::default() };
        let out = accumulation_functions(&inputs, params).unwrap();
        let state = out.state.unwrap();

        assert!(out.flux.get(0, 2).unwrap().is_nan());
        assert!(state.get(0, 2).unwrap().is_nan());
        // Upslope of the hole: a pit holding its own and its neighbour's input.
        assert_eq!(out.flux.get(0, 1).unwrap(), 2.0);
        assert_relative_eq!(out.summary.pit_flux, 2.0, epsilon = 1e-12);
        // Downslope of the hole: only local input.
        assert_eq!(out.flux.get(0, 3).unwrap(), 1.0);
        assert_eq!(state.get(0, 3).unwrap(), 0.0);
        assert_eq!(out.flux.get(0, 4).unwrap(), 2.0);
        assert_relative_eq!(out.summary.outflow, 2.0, epsilon = 1e-12);
        assert_eq!(out.summary.total, 4);
    }

    #[test]
    fn test_control_nodata_only_matters_when_required() {
        let dem = raster(vec![3.0, 2.0, 1.0], 1, 3);
        let input = dem.like(1.0);
        let control = raster(vec![f64::NAN, 1.0, 1.0], 1, 3);

        let inputs = AccumulationInputs::new(&dem, &input).with_control(&control);
        let out = accumulation_functions(&inputs, AccumulationParams::default()).unwrap();
        assert_eq!(out.flux.get(0, 0).unwrap(), 1.0);

        let params = AccumulationParams { operation: Operation::Fraction, ..Default::default() };
        let out = accumulation_functions(&inputs, params).unwrap();
        assert!(out.flux.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn test_missing_control_is_rejected_before_output() {
        let dem = cone(3);
        let input = dem.like(1.0);
        let index = SortedIndex::build(&dem).unwrap();
        let mut flux = dem.like(-7.0);
        let params = AccumulationParams { operation: Operation::Trigger, ..Default::default() };

        let result = route_accumulation(
            &AccumulationInputs::new(&dem, &input),
            &index,
            &params,
            &mut flux,
            None,
            &mut NoProgress,
        );

        assert!(matches!(result, Err(Error::MissingInput { name: "control", .. })));
        assert!(flux.data().iter().all(|&v| v == -7.0), "outputs must be untouched");
    }

    #[test]
    fn test_shape_mismatch() {
        let dem = cone(3);
        let input = Raster::filled(3, 4, 1.0);
        let result = accumulation_functions(&AccumulationInputs::new(&dem, &input), AccumulationParams::default());
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn test_empty_surface() {
        let dem = Raster::filled(2, 2, f64::NAN);
        let input = dem.like(1.0);
        let result = accumulation_functions(&AccumulationInputs::new(&dem, &input), AccumulationParams::default());
        assert!(matches!(result, Err(Error::EmptySurface)));
    }

    #[test]
    fn test_d8_switch_is_deterministic() {
        // Unique steepest neighbour everywhere: strongest drop to the east.
        let mut values = Vec::new();
        for row in 0..4 {
            for col in 0..5 {
                values.push(50.0 - 4.0 * col as f64 - 1.0 * row as f64);
            }
        }
        let dem = raster(values, 4, 5);
        let input = dem.like(1.0);
        let params = AccumulationParams {
            operation: Operation::Accumulate,
            routing: RoutingParams { use_d8_switch: true, threshold_linear: -1.0 },
        };

        let first = accumulation_functions(&AccumulationInputs::new(&dem, &input), params).unwrap();
        let second = accumulation_functions(&AccumulationInputs::new(&dem, &input), params).unwrap();

        // Pure D8 along rows: column c carries c + 1 units.
        for row in 0..4 {
            for col in 0..5 {
                assert_eq!(first.flux.get(row, col).unwrap(), (col + 1) as f64);
            }
        }
        let a: Vec<u64> = first.flux.data().iter().map(|v| v.to_bits()).collect();
        let b: Vec<u64> = second.flux.data().iter().map(|v| v.to_bits()).collect();
        assert_eq!(a, b);
        assert_relative_eq!(first.summary.outflow, 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_control_grid_selects_d8() {
        let mut values = Vec::new();
        for row in 0..3 {
            for col in 0..4 {
                values.push(20.0 - 3.0 * col as f64 - (row as f64 - 1.0).abs());
            }
        }
        let dem = raster(values, 3, 4);
        let input = dem.like(1.0);
        let linear = dem.like(5.0);
        let routing = RoutingParams { use_d8_switch: true, threshold_linear: 1.0 };
        let params = AccumulationParams { operation: Operation::Accumulate, routing };

        let d8 = accumulation_functions(
            &AccumulationInputs::new(&dem, &input).with_linear_control(&linear),
            params,
        )
        .unwrap();
        let mfd = accumulation_functions(&AccumulationInputs::new(&dem, &input), AccumulationParams::default())
            .unwrap();

        // D8 keeps whole units in column 1; MFD splits them.
        assert_eq!(d8.flux.get(0, 1).unwrap().fract(), 0.0);
        assert_ne!(mfd.flux.get(1, 1).unwrap().fract(), 0.0);
    }

    #[test]
    fn test_cancellation_leaves_partial_result() {
        let dem = cone(5);
        let input = dem.like(1.0);
        let mut stop_after_three = |done: usize, _total: usize| done < 3;

        let out = accumulation_functions_with_progress(
            &AccumulationInputs::new(&dem, &input),
            AccumulationParams::default(),
            &mut stop_after_three,
        )
        .unwrap();

        assert!(!out.summary.completed);
        assert_eq!(out.summary.processed, 3);
        assert_eq!(out.summary.total, 25);

        let index = SortedIndex::build(&dem).unwrap();
        for (rank, (row, col)) in index.iter().enumerate() {
            let v = out.flux.get(row, col).unwrap();
            if rank < 3 {
                assert!(v >= 1.0, "processed cell ({}, {}) holds {}", row, col, v);
            } else {
                assert!(v >= 0.0 && v.is_finite());
            }
        }
    }

    #[test]
    fn test_algorithm_trait() {
        let dem = cone(3);
        let rasters = AccumulationRasters {
            input: dem.like(1.0),
            surface: dem,
            state_in: None,
            control: None,
            linear_control: None,
        };
        let out = AccumulationFunctions.execute_default(rasters).unwrap();
        assert_relative_eq!(out.flux.get(1, 1).unwrap(), 9.0, epsilon = 1e-12);
        assert_eq!(AccumulationFunctions.name(), "Accumulation Functions");
    }
}
