//! Vertical and horizontal distance to a channel network
//!
//! Distances are propagated upslope from the channel cells: cells are
//! visited lowest first, and every upslope neighbour that drains into the
//! current cell inherits the current cell's distance plus the step between
//! them. With MFD routing a cell drains into several cells; it receives the
//! weighted mean of what its receivers pass up.
//!
//! - vertical: elevation above the channel cell the flow path ends in
//! - horizontal: planimetric length of the flow path
//! - overland: 3D length of the flow path
//!
//! Only in-grid neighbours are followed. Cells whose flow never reaches a
//! channel keep no-data.

use accuflow_core::{Direction, Error, GridAccess, Raster, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::routing::{FlowRoute, Gradients, RoutingMethod};
use super::sorted_index::SortedIndex;
use crate::maybe_rayon::*;

/// Parameters for channel distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDistanceParams {
    pub method: RoutingMethod,
}

/// Distances to the channel network, NaN where no channel is reached.
#[derive(Debug, Clone)]
pub struct ChannelDistance {
    pub vertical: Raster<f64>,
    pub horizontal: Raster<f64>,
    pub overland: Raster<f64>,
}

/// Compute distances from every cell to the channel its flow drains into.
///
/// # Arguments
/// * `dem` - Elevation
/// * `channels` - Any cell holding data is a channel cell
/// * `params` - D8 or MFD
pub fn channel_distance(
    dem: &Raster<f64>,
    channels: &Raster<f64>,
    params: ChannelDistanceParams,
) -> Result<ChannelDistance> {
    let (rows, cols) = dem.shape();
    Error::check_shape((rows, cols), channels.shape())?;
    let index = SortedIndex::build(dem)?;

    let method = params.method;
    let routes: Vec<Vec<FlowRoute>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            (0..cols)
                .map(|col| {
                    if dem.is_nodata_cell(row, col) {
                        return FlowRoute::Pit;
                    }
                    let g = Gradients::scan(dem, row, col, |r, c| !dem.is_nodata_cell(r, c));
                    method.route(&g.in_grid_only())
                })
                .collect()
        })
        .collect();
    let routes = Array2::from_shape_vec((rows, cols), routes.into_iter().flatten().collect())
        .map_err(|e| Error::Other(e.to_string()))?;

    let mut vertical = dem.like(f64::NAN);
    vertical.set_nodata(Some(f64::NAN));
    let mut horizontal = vertical.clone();
    let mut overland = vertical.clone();
    // Sum of the fractions a cell has passed to reached receivers.
    let mut weight: Array2<f64> = Array2::zeros((rows, cols));

    let mut reached = 0usize;
    for (row, col) in index.iter().rev() {
        if !channels.is_nodata_cell(row, col) {
            vertical.set_value(row, col, 0.0);
            horizontal.set_value(row, col, 0.0);
            overland.set_value(row, col, 0.0);
        } else if vertical.is_nodata_cell(row, col) {
            continue;
        } else {
            let w = weight[(row, col)];
            if w > 0.0 {
                for grid in [&mut vertical, &mut horizontal, &mut overland] {
                    let v = grid.value(row, col);
                    grid.set_value(row, col, v / w);
                }
            }
        }
        reached += 1;

        let z = dem.value(row, col);
        let sz = vertical.value(row, col);
        let sx = horizontal.value(row, col);
        let sd = overland.value(row, col);

        for dir in Direction::ALL {
            let Some((ur, uc)) = dem.neighbor(dir, row, col) else {
                continue;
            };
            let f = routes[(ur, uc)].fraction(dir.opposite());
            if f <= 0.0 {
                continue;
            }

            let dz = dem.value(ur, uc) - z;
            let dx = dem.neighbor_length(dir);
            let dd = dz.hypot(dx);

            if vertical.is_nodata_cell(ur, uc) {
                weight[(ur, uc)] = f;
                vertical.set_value(ur, uc, f * (sz + dz));
                horizontal.set_value(ur, uc, f * (sx + dx));
                overland.set_value(ur, uc, f * (sd + dd));
            } else {
                weight[(ur, uc)] += f;
                vertical.add_value(ur, uc, f * (sz + dz));
                horizontal.add_value(ur, uc, f * (sx + dx));
                overland.add_value(ur, uc, f * (sd + dd));
            }
        }
    }

    debug!(method = ?method, reached, cells = index.len(), "channel distance done");

    Ok(ChannelDistance {
        vertical,
        horizontal,
        overland,
    })
}
