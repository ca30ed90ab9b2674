//! # accuflow Algorithms
//!
//! Flow routing over elevation grids.
//!
//! - **hydrology**: accumulation functions, kinematic-wave overland flow,
//!   distance to channel network, and the shared routing building blocks

pub mod hydrology;
pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        accumulation_functions, channel_distance, kinematic_wave, AccumulationFunctions,
        AccumulationInputs, AccumulationParams, ChannelDistanceParams, KinematicWave,
        KinematicWaveParams, Operation, RoutingMethod, RoutingParams, SortedIndex,
    };
    pub use accuflow_core::prelude::*;
}
