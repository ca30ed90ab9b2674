//! Hydrological routing on elevation grids
//!
//! - Sorted index: descending-elevation traversal shared by every pass
//! - Routing: D8 / MFD flow-direction selection with the optional D8 switch
//! - Transfer: accumulate, capacity, fraction, threshold and trigger operations
//! - Accumulation functions: single-pass flux/state routing
//! - Kinematic wave: timestepped overland flow with a Newton-Raphson solver
//! - Channel distance: vertical/horizontal distance to a channel network

mod accumulation_functions;
mod channel_distance;
mod kinematic_wave;
mod routing;
mod sorted_index;
mod transfer;

pub use accumulation_functions::{
    accumulation_functions, accumulation_functions_with_progress, route_accumulation,
    AccumulationFunctions, AccumulationInputs, AccumulationOutput, AccumulationParams,
    AccumulationRasters, PassSummary,
};
pub use channel_distance::{channel_distance, ChannelDistance, ChannelDistanceParams};
pub use kinematic_wave::{
    kinematic_alpha, kinematic_wave, outlet_gauges, Hydrograph, KinematicCell, KinematicWave,
    KinematicWaveOutput, KinematicWaveParams, KinematicWaveSummary, NewtonSolver, Precipitation,
    PrecipitationDistribution, SolveStatus, ALPHA_MAX, BETA_0, BETA_1, MIN_ROUGHNESS,
};
pub use routing::{FlowRoute, Gradients, RoutingMethod, RoutingParams, MFD_CONVERGENCE};
pub use sorted_index::SortedIndex;
pub use transfer::{Operation, Transfer};
