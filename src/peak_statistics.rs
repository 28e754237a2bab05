use std::fmt::Debug;

use cfg_if::cfg_if;
use num_traits::{Float, FromPrimitive};

pub fn _isclose<T>(x: T, y: T, rtol: T, atol: T) -> bool
where
    T: Float,
{
    (x - y).abs() <= (atol + rtol * y.abs())
}

pub fn isclose<T>(x: T, y: T) -> bool
where
    T: Float + FromPrimitive,
{
    _isclose(x, y, T::from_f64(1e-5).unwrap(), T::from_f64(1e-8).unwrap())
}

pub fn aboutzero<T>(x: T) -> bool
where
    T: Float + FromPrimitive,
{
    isclose(x, T::zero())
}

/// Least squares fit of a polynomial of `degree` in `x - center`.
///
/// Returns the coefficients in increasing order of power, or `None` when there are
/// too few points or the system is rank deficient.
pub fn polynomial_regression(xs: &[f64], ys: &[f64], degree: usize, center: f64) -> Option<Vec<f64>> {
    let n_terms = degree + 1;
    if xs.len() != ys.len() || xs.len() < n_terms {
        return None;
    }
    let coefs = solve_least_squares(xs, ys, n_terms, center)?;
    if coefs.iter().all(|c| c.is_finite()) {
        Some(coefs)
    } else {
        None
    }
}

cfg_if! {
    if #[cfg(feature = "nalgebra")] {
        #[allow(non_snake_case)]
        fn solve_least_squares(xs: &[f64], ys: &[f64], n_terms: usize, center: f64) -> Option<Vec<f64>> {
            use nalgebra::{DMatrix, DVector};

            let A = DMatrix::from_fn(xs.len(), n_terms, |i, j| (xs[i] - center).powi(j as i32));
            let Z = DVector::from_column_slice(ys);
            let svd = A.svd(true, true);
            if svd.rank(1e-10) < n_terms {
                return None;
            }
            let B = svd.solve(&Z, 1e-12).ok()?;
            Some(B.iter().copied().collect())
        }
    } else {
        fn solve_least_squares(xs: &[f64], ys: &[f64], n_terms: usize, center: f64) -> Option<Vec<f64>> {
            // Normal equations, solved by elimination with partial pivoting
            let mut system = vec![vec![0.0; n_terms + 1]; n_terms];
            for (x, y) in xs.iter().zip(ys.iter()) {
                let dx = x - center;
                for row in 0..n_terms {
                    let xr = dx.powi(row as i32);
                    for col in 0..n_terms {
                        system[row][col] += xr * dx.powi(col as i32);
                    }
                    system[row][n_terms] += xr * y;
                }
            }

            for col in 0..n_terms {
                let pivot = (col..n_terms)
                    .max_by(|a, b| system[*a][col].abs().total_cmp(&system[*b][col].abs()))?;
                if aboutzero(system[pivot][col]) {
                    return None;
                }
                system.swap(col, pivot);
                let pivot_row = system[col].clone();
                for row in system.iter_mut().skip(col + 1) {
                    let factor = row[col] / pivot_row[col];
                    for k in col..=n_terms {
                        row[k] -= factor * pivot_row[k];
                    }
                }
            }

            let mut coefs = vec![0.0; n_terms];
            for row in (0..n_terms).rev() {
                let tail: f64 = ((row + 1)..n_terms).map(|k| system[row][k] * coefs[k]).sum();
                coefs[row] = (system[row][n_terms] - tail) / system[row][row];
            }
            Some(coefs)
        }
    }
}

/// The half-maximum crossings of a peak, relative to its apex
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct WidthFit {
    pub right_width: f64,
    pub left_width: f64,
    pub full_width_at_half_max: f64,
}

/// Walk outwards from the apex at `index` until the signal falls below half of the
/// apex value and interpolate the crossing on each side. A side that never falls
/// below half maximum ends at the edge of the arrays.
pub fn full_width_at_half_max(xs: &[f64], ys: &[f64], index: usize) -> WidthFit {
    let mut fit = WidthFit::default();
    if index >= xs.len() || xs.len() != ys.len() {
        return fit;
    }
    let peak = ys[index];
    if peak <= 0.0 || aboutzero(peak) {
        return fit;
    }
    let peak_half = peak / 2.0;
    let x = xs[index];
    let n = xs.len() - 1;

    let mut i = index;
    while i > 0 && ys[i - 1] >= peak_half {
        i -= 1;
    }
    let rising = if i == 0 {
        xs[0]
    } else {
        interpolate_crossing(xs[i - 1], ys[i - 1], xs[i], ys[i], peak_half)
    };

    let mut j = index;
    while j < n && ys[j + 1] >= peak_half {
        j += 1;
    }
    let falling = if j == n {
        xs[n]
    } else {
        interpolate_crossing(xs[j + 1], ys[j + 1], xs[j], ys[j], peak_half)
    };

    fit.left_width = x - rising;
    fit.right_width = falling - x;
    fit.full_width_at_half_max = falling - rising;
    fit
}

fn interpolate_crossing(x1: f64, y1: f64, x2: f64, y2: f64, level: f64) -> f64 {
    if aboutzero(y2 - y1) {
        x1
    } else {
        x1 + (x2 - x1) * ((level - y1) / (y2 - y1))
    }
}

/// Fit a parabola through the apex at `index` and its two neighbours, returning
/// the position of its vertex.
pub fn quadratic_fit(xs: &[f64], ys: &[f64], index: usize) -> f64 {
    let n = xs.len() - 1;
    if index < 1 {
        xs[0]
    } else if index >= n {
        xs[n]
    } else {
        let x1 = xs[index - 1];
        let x2 = xs[index];
        let x3 = xs[index + 1];
        let y1 = ys[index - 1];
        let y2 = ys[index];
        let y3 = ys[index + 1];
        let d = (y2 - y1) * (x3 - x2) - (y3 - y2) * (x2 - x1);
        if aboutzero(d) {
            x2
        } else {
            ((x1 + x2) - ((y2 - y1) * (x3 - x2) * (x1 - x3)) / d) / 2.0
        }
    }
}

/// Debug helper for regressions: the residual sum of squares of `coefs` over the points
pub fn residual_sum_of_squares<T: Float + Into<f64> + Debug>(xs: &[T], ys: &[T], coefs: &[f64], center: f64) -> f64 {
    xs.iter()
        .zip(ys.iter())
        .map(|(x, y)| {
            let dx = (*x).into() - center;
            let fit = coefs.iter().rev().fold(0.0, |acc, c| acc * dx + c);
            let r = (*y).into() - fit;
            r * r
        })
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;

    fn gaussian(xs: &[f64], amplitude: f64, mu: f64, sigma: f64) -> Vec<f64> {
        xs.iter()
            .map(|x| amplitude * (-(x - mu).powi(2) / (2.0 * sigma * sigma)).exp())
            .collect()
    }

    #[test]
    fn test_isclose() {
        assert!(isclose(1.0, 1.0 + 1e-9));
        assert!(!isclose(1.0, 1.001));
        assert!(aboutzero(1e-10f32));
    }

    #[test]
    fn test_linear_regression() {
        let xs: Vec<f64> = (100..120).map(|x| x as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 + 0.5 * x).collect();
        let center = 110.0;
        let coefs = polynomial_regression(&xs, &ys, 1, center).unwrap();
        assert!((coefs[0] - (2.0 + 0.5 * center)).abs() < 1e-8);
        assert!((coefs[1] - 0.5).abs() < 1e-8);
        assert!(residual_sum_of_squares(&xs, &ys, &coefs, center) < 1e-12);
    }

    #[test]
    fn test_quadratic_regression() {
        let xs: Vec<f64> = (0..40).map(|x| x as f64 * 10.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 7.0 - 0.1 * x + 1e-4 * x * x).collect();
        let coefs = polynomial_regression(&xs, &ys, 2, 0.0).unwrap();
        assert!((coefs[0] - 7.0).abs() < 1e-6);
        assert!((coefs[1] + 0.1).abs() < 1e-8);
        assert!((coefs[2] - 1e-4).abs() < 1e-10);
    }

    #[test]
    fn test_regression_degenerate() {
        assert!(polynomial_regression(&[1.0], &[2.0], 1, 0.0).is_none());
        assert!(polynomial_regression(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0], 1, 0.0).is_none());
        assert!(polynomial_regression(&[1.0, 2.0], &[1.0], 0, 0.0).is_none());
    }

    #[test]
    fn test_quadratic_fit() {
        let xs: Vec<f64> = (0..21).map(|x| x as f64).collect();
        let ys = gaussian(&xs, 100.0, 10.3, 2.0);
        let apex = quadratic_fit(&xs, &ys, 10);
        assert!((apex - 10.3).abs() < 0.05, "{apex}");
        assert_eq!(quadratic_fit(&xs, &ys, 0), 0.0);
        assert_eq!(quadratic_fit(&xs, &ys, 20), 20.0);
    }

    #[test]
    fn test_full_width_at_half_max() {
        let xs: Vec<f64> = (0..61).map(|x| x as f64).collect();
        let sigma = 3.0;
        let ys = gaussian(&xs, 500.0, 30.0, sigma);
        let fit = full_width_at_half_max(&xs, &ys, 30);
        let expected = 2.0 * (2.0 * 2f64.ln()).sqrt() * sigma;
        assert!((fit.full_width_at_half_max - expected).abs() < 0.1, "{fit:?}");
        assert!((fit.left_width - fit.right_width).abs() < 1e-9);

        let flat = full_width_at_half_max(&xs, &vec![0.0; 61], 30);
        assert_eq!(flat, WidthFit::default());
    }
}
