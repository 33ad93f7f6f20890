//! Patch lattice fitting and canonical grid geometry
//!
//! Candidate patch centres are snapped onto an affine lattice
//! `origin + row * row_step + col * col_step`:
//! 1. Grid orientation from the 4-fold circular mean of nearest-neighbour
//!    directions
//! 2. Separate row and column pitch along the rotated axes
//! 3. Integer (row, col) assignment, least-squares affine fit, one
//!    re-assignment pass with the fitted lattice
//!
//! The lattice is then turned into one of four [`GridGeometry`] candidates,
//! one per quarter rotation, from which the detector picks the canonical one.

use std::collections::HashMap;
use std::f64::consts::PI;

use nalgebra::{DMatrix, Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::fitting::SVD_EPSILON;
use crate::{CalibrationError, Result};

/// Placement of a `rows x cols` patch grid in image pixel coordinates
///
/// Patch `(row, col)` has index `row * cols + col` and its centre at
/// `origin + row * row_step + col * col_step`. Canonical patch `(0, 0)` is the
/// darkest corner of the card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// Centre of patch (0, 0), as (x, y)
    pub origin: [f64; 2],
    /// Offset from one row to the next
    pub row_step: [f64; 2],
    /// Offset from one column to the next
    pub col_step: [f64; 2],
    pub rows: usize,
    pub cols: usize,
    /// Half-width of the square sampling window, in pixels
    pub sample_radius: u32,
    /// Whether a patch region was actually seen at each cell, row-major
    pub observed: Vec<bool>,
}

impl GridGeometry {
    pub fn patch_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Centre of patch `(row, col)` as (x, y)
    pub fn centre(&self, row: usize, col: usize) -> (f64, f64) {
        let (r, c) = (row as f64, col as f64);
        (
            self.origin[0] + r * self.row_step[0] + c * self.col_step[0],
            self.origin[1] + r * self.row_step[1] + c * self.col_step[1],
        )
    }

    /// Centre of the patch with a row-major index
    pub fn centre_of_index(&self, index: usize) -> (f64, f64) {
        self.centre(index / self.cols, index % self.cols)
    }

    /// Smaller of the two grid pitches, in pixels
    pub fn pitch(&self) -> f64 {
        let norm = |v: [f64; 2]| (v[0] * v[0] + v[1] * v[1]).sqrt();
        norm(self.row_step).min(norm(self.col_step))
    }

    /// Grid cell nearest to a pixel position, if it lies on the grid
    pub fn cell_of(&self, point: (f64, f64)) -> Option<(usize, usize)> {
        let basis = Matrix2::new(
            self.row_step[0],
            self.col_step[0],
            self.row_step[1],
            self.col_step[1],
        );
        let inverse = basis.try_inverse()?;
        let rc = inverse * Vector2::new(point.0 - self.origin[0], point.1 - self.origin[1]);
        let (row, col) = (rc[0].round(), rc[1].round());
        if row < 0.0 || col < 0.0 || row >= self.rows as f64 || col >= self.cols as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Sampling window `(x0, y0, x1, y1)`, half-open, around a patch centre
    ///
    /// `None` when the window does not lie entirely inside the image.
    pub fn window(&self, index: usize, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let (cx, cy) = self.centre_of_index(index);
        let r = self.sample_radius as f64;
        let (cx, cy) = (cx.round(), cy.round());
        let (x0, y0, x1, y1) = (cx - r, cy - r, cx + r + 1.0, cy + r + 1.0);
        if x0 < 0.0 || y0 < 0.0 || x1 > width as f64 || y1 > height as f64 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    pub fn is_observed(&self, index: usize) -> bool {
        self.observed.get(index).copied().unwrap_or(false)
    }
}

/// Affine lattice fitted to candidate centres
#[derive(Debug, Clone)]
pub(crate) struct Lattice {
    pub origin: Vector2<f64>,
    pub row_step: Vector2<f64>,
    pub col_step: Vector2<f64>,
    pub rows: usize,
    pub cols: usize,
    /// Cells holding a candidate
    pub occupied: Vec<(usize, usize)>,
    /// Mean distance between candidates and their lattice position
    pub mean_residual: f64,
}

impl Lattice {
    pub fn pitch(&self) -> f64 {
        self.row_step.norm().min(self.col_step.norm())
    }

    /// Geometry after `quarter_turns` quarter rotations of the cell indices,
    /// or `None` when the rotated grid is not `rows x cols`
    pub fn orient(&self, quarter_turns: u8, rows: usize, cols: usize, sample_radius: u32) -> Option<GridGeometry> {
        let (lr, lc) = (self.rows, self.cols);
        let last_row = (lr - 1) as f64;
        let last_col = (lc - 1) as f64;
        let (origin, row_step, col_step, dims) = match quarter_turns % 4 {
            0 => (self.origin, self.row_step, self.col_step, (lr, lc)),
            1 => (self.origin + self.row_step * last_row, self.col_step, -self.row_step, (lc, lr)),
            2 => (
                self.origin + self.row_step * last_row + self.col_step * last_col,
                -self.row_step,
                -self.col_step,
                (lr, lc),
            ),
            _ => (self.origin + self.col_step * last_col, -self.col_step, self.row_step, (lc, lr)),
        };
        if dims != (rows, cols) {
            return None;
        }

        let mut observed = vec![false; rows * cols];
        for &(r, c) in &self.occupied {
            let (r2, c2) = rotate_cell(quarter_turns, r, c, lr, lc);
            observed[r2 * cols + c2] = true;
        }

        Some(GridGeometry {
            origin: [origin[0], origin[1]],
            row_step: [row_step[0], row_step[1]],
            col_step: [col_step[0], col_step[1]],
            rows,
            cols,
            sample_radius,
            observed,
        })
    }
}

/// Cell of a `rows x cols` lattice after quarter rotations
fn rotate_cell(quarter_turns: u8, r: usize, c: usize, rows: usize, cols: usize) -> (usize, usize) {
    match quarter_turns % 4 {
        0 => (r, c),
        1 => (c, rows - 1 - r),
        2 => (rows - 1 - r, cols - 1 - c),
        _ => (cols - 1 - c, r),
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}

/// Median nearest-neighbour distance of a point set
pub(crate) fn median_neighbour_distance(points: &[(f64, f64)]) -> Option<f64> {
    let mut nearest: Vec<f64> = points
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| {
            points
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &q)| distance(p, q))
                .min_by(f64::total_cmp)
        })
        .collect();
    median(&mut nearest)
}

/// Grid angle in (-45°, 45°] from nearest-neighbour directions
fn grid_angle(points: &[(f64, f64)]) -> f64 {
    let (mut sum_cos, mut sum_sin) = (0.0, 0.0);
    for (i, &p) in points.iter().enumerate() {
        let nearest = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, &q)| q)
            .min_by(|a, b| distance(p, *a).total_cmp(&distance(p, *b)));
        if let Some(q) = nearest {
            let phi = (q.1 - p.1).atan2(q.0 - p.0);
            sum_cos += (4.0 * phi).cos();
            sum_sin += (4.0 * phi).sin();
        }
    }
    let theta = sum_sin.atan2(sum_cos) / 4.0;
    if theta <= -PI / 4.0 {
        theta + PI / 2.0
    } else {
        theta
    }
}

/// Row and column pitch along the rotated axes
///
/// Each point contributes its nearest neighbour along each axis; one axis
/// borrows the other's pitch when no point has a neighbour along it.
fn axis_pitches(rotated: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut along_cols = Vec::new();
    let mut along_rows = Vec::new();
    for (i, &p) in rotated.iter().enumerate() {
        let mut best_col = f64::INFINITY;
        let mut best_row = f64::INFINITY;
        for (j, &q) in rotated.iter().enumerate() {
            if i == j {
                continue;
            }
            let (du, dv) = (q.0 - p.0, q.1 - p.1);
            let d = (du * du + dv * dv).sqrt();
            if du.abs() >= dv.abs() {
                best_col = best_col.min(d);
            } else {
                best_row = best_row.min(d);
            }
        }
        if best_col.is_finite() {
            along_cols.push(best_col);
        }
        if best_row.is_finite() {
            along_rows.push(best_row);
        }
    }

    match (median(&mut along_rows), median(&mut along_cols)) {
        (Some(r), Some(c)) => Some((r, c)),
        (Some(r), None) => Some((r, r)),
        (None, Some(c)) => Some((c, c)),
        (None, None) => None,
    }
}

/// Least-squares affine lattice through points with known integer cells
fn fit_affine(points: &[(f64, f64)], cells: &[(i64, i64)]) -> Option<(Vector2<f64>, Vector2<f64>, Vector2<f64>)> {
    let n = points.len();
    let design = DMatrix::from_fn(n, 3, |r, c| match c {
        0 => 1.0,
        1 => cells[r].0 as f64,
        _ => cells[r].1 as f64,
    });
    let rhs = DMatrix::from_fn(n, 2, |r, c| if c == 0 { points[r].0 } else { points[r].1 });

    let svd = design.svd(true, true);
    let eps = SVD_EPSILON * svd.singular_values.max();
    if svd.rank(eps) < 3 {
        return None;
    }
    let solution = svd.solve(&rhs, eps).ok()?;
    Some((
        Vector2::new(solution[(0, 0)], solution[(0, 1)]),
        Vector2::new(solution[(1, 0)], solution[(1, 1)]),
        Vector2::new(solution[(2, 0)], solution[(2, 1)]),
    ))
}

fn assign_cells(
    points: &[(f64, f64)],
    origin: Vector2<f64>,
    row_step: Vector2<f64>,
    col_step: Vector2<f64>,
) -> Option<Vec<(i64, i64)>> {
    let inverse = Matrix2::from_columns(&[row_step, col_step]).try_inverse()?;
    Some(
        points
            .iter()
            .map(|&(x, y)| {
                let rc = inverse * (Vector2::new(x, y) - origin);
                (rc[0].round() as i64, rc[1].round() as i64)
            })
            .collect(),
    )
}

/// Fit an affine lattice to candidate patch centres
///
/// # Errors
///
/// `CardNotFound` when there are too few points or they are collinear
pub(crate) fn fit_lattice(points: &[(f64, f64)]) -> Result<Lattice> {
    if points.len() < 4 {
        return Err(CalibrationError::card_not_found(format!(
            "{} patch candidates, at least 4 needed to fit a grid",
            points.len()
        )));
    }

    // Step 1: Orientation and axis pitches
    let theta = grid_angle(points);
    let (sin, cos) = theta.sin_cos();
    let rotated: Vec<(f64, f64)> = points
        .iter()
        .map(|&(x, y)| (x * cos + y * sin, -x * sin + y * cos))
        .collect();
    let (row_pitch, col_pitch) = axis_pitches(&rotated)
        .ok_or_else(|| CalibrationError::card_not_found("patch spacing could not be measured"))?;
    debug!(
        angle_deg = theta.to_degrees(),
        row_pitch, col_pitch, "estimated grid orientation"
    );

    // Step 2: Initial integer assignment along the rotated axes
    let u_min = rotated.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let v_min = rotated.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let initial: Vec<(i64, i64)> = rotated
        .iter()
        .map(|&(u, v)| (((v - v_min) / row_pitch).round() as i64, ((u - u_min) / col_pitch).round() as i64))
        .collect();

    // Step 3: Fit, re-assign with the fitted lattice and fit again
    let degenerate = || CalibrationError::card_not_found("patch candidates do not span a 2D grid");
    let (origin, row_step, col_step) = fit_affine(points, &initial).ok_or_else(degenerate)?;
    let cells = assign_cells(points, origin, row_step, col_step).ok_or_else(degenerate)?;

    // Step 4: One candidate per cell, the one closest to its lattice position
    let mut best: HashMap<(i64, i64), (usize, f64)> = HashMap::new();
    for (i, (&p, &cell)) in points.iter().zip(&cells).enumerate() {
        let predicted = origin + row_step * cell.0 as f64 + col_step * cell.1 as f64;
        let residual = distance(p, (predicted[0], predicted[1]));
        best.entry(cell)
            .and_modify(|slot| {
                if residual < slot.1 {
                    *slot = (i, residual);
                }
            })
            .or_insert((i, residual));
    }
    let mut unique: Vec<((i64, i64), usize)> = best.iter().map(|(&cell, &(i, _))| (cell, i)).collect();
    unique.sort_unstable();
    if unique.len() < points.len() {
        debug!(
            duplicates = points.len() - unique.len(),
            "dropped candidates sharing a grid cell"
        );
    }

    let kept_points: Vec<(f64, f64)> = unique.iter().map(|&(_, i)| points[i]).collect();
    let kept_cells: Vec<(i64, i64)> = unique.iter().map(|&(cell, _)| cell).collect();
    let (origin, row_step, col_step) = fit_affine(&kept_points, &kept_cells).ok_or_else(degenerate)?;

    let row_min = kept_cells.iter().map(|c| c.0).min().unwrap_or(0);
    let col_min = kept_cells.iter().map(|c| c.1).min().unwrap_or(0);
    let row_max = kept_cells.iter().map(|c| c.0).max().unwrap_or(0);
    let col_max = kept_cells.iter().map(|c| c.1).max().unwrap_or(0);

    let mean_residual = kept_points
        .iter()
        .zip(&kept_cells)
        .map(|(&p, &(r, c))| {
            let predicted = origin + row_step * r as f64 + col_step * c as f64;
            distance(p, (predicted[0], predicted[1]))
        })
        .sum::<f64>()
        / kept_points.len() as f64;

    Ok(Lattice {
        origin: origin + row_step * row_min as f64 + col_step * col_min as f64,
        row_step,
        col_step,
        rows: (row_max - row_min + 1) as usize,
        cols: (col_max - col_min + 1) as usize,
        occupied: kept_cells
            .iter()
            .map(|&(r, c)| ((r - row_min) as usize, (c - col_min) as usize))
            .collect(),
        mean_residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_points(rows: usize, cols: usize, origin: (f64, f64), pitch: (f64, f64), angle_deg: f64) -> Vec<(f64, f64)> {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let mut points = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                let (u, v) = (c as f64 * pitch.1, r as f64 * pitch.0);
                points.push((origin.0 + u * cos - v * sin, origin.1 + u * sin + v * cos));
            }
        }
        points
    }

    #[test]
    fn test_axis_aligned_grid() {
        let points = grid_points(4, 6, (100.0, 50.0), (40.0, 40.0), 0.0);
        let lattice = fit_lattice(&points).unwrap();
        assert_eq!((lattice.rows, lattice.cols), (4, 6));
        assert_eq!(lattice.occupied.len(), 24);
        assert_relative_eq!(lattice.origin[0], 100.0, epsilon = 1e-6);
        assert_relative_eq!(lattice.origin[1], 50.0, epsilon = 1e-6);
        assert_relative_eq!(lattice.col_step[0], 40.0, epsilon = 1e-6);
        assert_relative_eq!(lattice.row_step[1], 40.0, epsilon = 1e-6);
        assert!(lattice.mean_residual < 1e-6);
    }

    #[test]
    fn test_rotated_grid_with_unequal_pitch() {
        let points = grid_points(4, 6, (200.0, 120.0), (55.0, 40.0), 12.0);
        let lattice = fit_lattice(&points).unwrap();
        assert_eq!((lattice.rows, lattice.cols), (4, 6));
        assert_relative_eq!(lattice.row_step.norm(), 55.0, epsilon = 1e-6);
        assert_relative_eq!(lattice.col_step.norm(), 40.0, epsilon = 1e-6);
        assert!(lattice.mean_residual < 1e-6);
    }

    #[test]
    fn test_missing_cells_keep_grid_size() {
        let mut points = grid_points(4, 6, (100.0, 100.0), (50.0, 50.0), -7.0);
        points.remove(8);
        points.remove(14);
        let lattice = fit_lattice(&points).unwrap();
        assert_eq!((lattice.rows, lattice.cols), (4, 6));
        assert_eq!(lattice.occupied.len(), 22);
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        assert!(matches!(
            fit_lattice(&points),
            Err(CalibrationError::CardNotFound { .. })
        ));
    }

    #[test]
    fn test_collinear_points_are_not_a_grid() {
        let points: Vec<(f64, f64)> = (0..6).map(|i| (i as f64 * 30.0, 10.0)).collect();
        assert!(fit_lattice(&points).is_err());
    }

    #[test]
    fn test_rotations_cover_both_orientations() {
        let points = grid_points(4, 6, (0.0, 0.0), (10.0, 10.0), 0.0);
        let lattice = fit_lattice(&points).unwrap();

        let upright: Vec<u8> = (0..4).filter(|&k| lattice.orient(k, 4, 6, 2).is_some()).collect();
        assert_eq!(upright, vec![0, 2]);
        let sideways: Vec<u8> = (0..4).filter(|&k| lattice.orient(k, 6, 4, 2).is_some()).collect();
        assert_eq!(sideways, vec![1, 3]);
    }

    #[test]
    fn test_orient_maps_cells_onto_centres() {
        let points = grid_points(4, 6, (0.0, 0.0), (10.0, 10.0), 0.0);
        let lattice = fit_lattice(&points).unwrap();

        let half_turn = lattice.orient(2, 4, 6, 2).unwrap();
        let (x, y) = half_turn.centre(0, 0);
        assert_relative_eq!(x, 50.0, epsilon = 1e-6);
        assert_relative_eq!(y, 30.0, epsilon = 1e-6);

        // Every lattice cell maps to a distinct point
        for k in [1u8, 3] {
            let g = lattice.orient(k, 6, 4, 2).unwrap();
            let mut seen = std::collections::HashSet::new();
            for i in 0..g.patch_count() {
                let (x, y) = g.centre_of_index(i);
                assert!(seen.insert((x.round() as i64, y.round() as i64)));
                assert_eq!(g.cell_of((x, y)), Some((i / 4, i % 4)));
            }
            assert!(g.observed.iter().all(|&o| o));
        }
    }

    #[test]
    fn test_window_inside_image_only() {
        let geometry = GridGeometry {
            origin: [5.0, 5.0],
            row_step: [0.0, 20.0],
            col_step: [20.0, 0.0],
            rows: 2,
            cols: 2,
            sample_radius: 3,
            observed: vec![true; 4],
        };
        assert_eq!(geometry.window(0, 40, 40), Some((2, 2, 9, 9)));
        assert_eq!(geometry.window(3, 40, 40), Some((22, 22, 29, 29)));
        assert!(geometry.window(3, 28, 40).is_none());
        assert_relative_eq!(geometry.pitch(), 20.0);
    }
}
