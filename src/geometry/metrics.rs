//! Cell measures and element-wise linear gradients.
//!
//! Non-simplex cells are handled through their decomposition into simplices
//! ([`CellType::simplices`]): a quad is two triangles, a hex six tets.
//! 2D cells are assumed to lie in the `z = 0` plane.

use crate::mesh::distributed::sub;
use crate::mesh::field::norm;
use crate::topology::cell_type::CellType;
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Area of a triangle or volume of a tet (unsigned).
pub fn simplex_measure(pts: &[[f64; 3]]) -> f64 {
    match pts.len() {
        3 => 0.5 * norm(cross(sub(pts[1], pts[0]), sub(pts[2], pts[0]))),
        4 => {
            let (a, b, c) = (sub(pts[1], pts[0]), sub(pts[2], pts[0]), sub(pts[3], pts[0]));
            dot(a, cross(b, c)).abs() / 6.0
        }
        _ => 0.0,
    }
}

/// Measure of a cell given its vertex coordinates in local order.
pub fn cell_measure(cell: CellType, pts: &[[f64; 3]]) -> f64 {
    cell.simplices()
        .iter()
        .map(|s| simplex_measure(&s.iter().map(|&l| pts[l]).collect::<Vec<_>>()))
        .sum()
}

/// Largest distance between two vertices.
pub fn diameter(pts: &[[f64; 3]]) -> f64 {
    let mut d: f64 = 0.0;
    for (i, a) in pts.iter().enumerate() {
        for b in &pts[i + 1..] {
            d = d.max(norm(sub(*b, *a)));
        }
    }
    d
}

/// Gradient of the linear interpolant of `values` on a simplex.
///
/// Returns `None` for a degenerate simplex.
pub fn simplex_gradient(pts: &[[f64; 3]], values: &[f64]) -> Option<[f64; 3]> {
    match pts.len() {
        3 => {
            let (e1, e2) = (sub(pts[1], pts[0]), sub(pts[2], pts[0]));
            let m = Matrix2::new(e1[0], e1[1], e2[0], e2[1]);
            let du = Vector2::new(values[1] - values[0], values[2] - values[0]);
            let g = m.try_inverse()? * du;
            Some([g[0], g[1], 0.0])
        }
        4 => {
            let (e1, e2, e3) = (sub(pts[1], pts[0]), sub(pts[2], pts[0]), sub(pts[3], pts[0]));
            let m = Matrix3::new(
                e1[0], e1[1], e1[2], e2[0], e2[1], e2[2], e3[0], e3[1], e3[2],
            );
            let du = Vector3::new(
                values[1] - values[0],
                values[2] - values[0],
                values[3] - values[0],
            );
            let g = m.try_inverse()? * du;
            Some([g[0], g[1], g[2]])
        }
        _ => None,
    }
}

/// Integral of the piecewise-linear interpolant of `values` over a cell.
pub fn cell_integral(cell: CellType, pts: &[[f64; 3]], values: &[f64]) -> f64 {
    cell.simplices()
        .iter()
        .map(|s| {
            let p: Vec<[f64; 3]> = s.iter().map(|&l| pts[l]).collect();
            let mean = s.iter().map(|&l| values[l]).sum::<f64>() / s.len() as f64;
            simplex_measure(&p) * mean
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SQUARE: [[f64; 3]; 4] = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 1.0, 0.0], [0.0, 1.0, 0.0]];

    #[test]
    fn measures_and_diameters() {
        assert_relative_eq!(cell_measure(CellType::Quadrilateral, &SQUARE), 2.0);
        assert_relative_eq!(diameter(&SQUARE), 5f64.sqrt());
        let tet = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_relative_eq!(simplex_measure(&tet), 1.0 / 6.0);
    }

    #[test]
    fn linear_gradients_are_exact() {
        // u = 3x - y + 2
        let u = |p: [f64; 3]| 3.0 * p[0] - p[1] + 2.0;
        let tri = [SQUARE[0], SQUARE[1], SQUARE[2]];
        let g = simplex_gradient(&tri, &tri.map(u)).unwrap();
        assert_relative_eq!(g[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(g[1], -1.0, epsilon = 1e-12);

        let tet = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let w = |p: [f64; 3]| p[0] + 2.0 * p[1] + 4.0 * p[2];
        let g = simplex_gradient(&tet, &tet.map(w)).unwrap();
        assert_relative_eq!(g[2], 4.0, epsilon = 1e-12);

        let flat = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        assert!(simplex_gradient(&flat, &[0.0, 1.0, 2.0]).is_none());
    }

    #[test]
    fn integral_of_linear_field() {
        let values = SQUARE.map(|p| p[0]);
        // ∫ x over [0,2]×[0,1] = 2
        assert_relative_eq!(cell_integral(CellType::Quadrilateral, &SQUARE, &values), 2.0, epsilon = 1e-12);
    }
}
