//! Derivative-free Nelder-Mead minimization.
//!
//! The optimizer path of the inversion minimizes the regularized
//! objective directly over the coefficient vector. The objective is
//! convex quadratic there, so the simplex iteration is reliable; its
//! value is the cancellation hook: an abort predicate is polled once per
//! iteration and stops the search at the best vertex found so far.

use ndarray::Array1;
use std::cmp::Ordering;
use std::fmt;

/// Configuration for the Nelder-Mead iteration.
#[derive(Debug, Clone)]
pub struct SimplexConfig {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Relative spread of the simplex function values at which the
    /// iteration is considered converged.
    pub ftol: f64,
    /// Initial displacement of each non-zero coordinate, relative to its
    /// magnitude.
    pub initial_step: f64,
    /// Absolute initial displacement for zero coordinates.
    pub zero_step: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            ftol: 1e-9,
            initial_step: 0.1,
            zero_step: 2.5e-4,
        }
    }
}

/// Result of a Nelder-Mead run.
#[derive(Debug, Clone)]
pub struct SimplexResult {
    /// Best point found.
    pub x: Array1<f64>,
    /// Objective value at the best point.
    pub fval: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Number of objective evaluations.
    pub func_evals: usize,
    /// Whether the convergence criterion was met.
    pub converged: bool,
    /// Whether the abort predicate stopped the search.
    pub aborted: bool,
    /// Description of how the iteration ended.
    pub message: String,
}

impl fmt::Display for SimplexResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nelder-Mead Result:")?;
        writeln!(f, "  Converged: {}", self.converged)?;
        writeln!(f, "  Aborted: {}", self.aborted)?;
        writeln!(f, "  Objective: {:.6e}", self.fval)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)
    }
}

// Standard Nelder-Mead coefficients
const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimize `objective` starting from `x0`.
///
/// # Arguments
///
/// * `objective` - Function to minimize
/// * `x0` - Starting point (must be non-empty)
/// * `config` - Iteration controls
/// * `abort_test` - Polled once per iteration; returning true stops the
///   search immediately with the best vertex so far
pub fn minimize<F, A>(
    objective: F,
    x0: &Array1<f64>,
    config: &SimplexConfig,
    abort_test: A,
) -> SimplexResult
where
    F: Fn(&Array1<f64>) -> f64,
    A: Fn() -> bool,
{
    let n = x0.len();
    assert!(n >= 1, "cannot minimize over an empty vector");

    // Initial simplex: x0 plus one displaced vertex per coordinate
    let mut vertices: Vec<Array1<f64>> = Vec::with_capacity(n + 1);
    vertices.push(x0.clone());
    for i in 0..n {
        let mut v = x0.clone();
        if v[i] != 0.0 {
            v[i] += config.initial_step * v[i].abs();
        } else {
            v[i] = config.zero_step;
        }
        vertices.push(v);
    }
    let mut fvals: Vec<f64> = vertices.iter().map(|v| objective(v)).collect();
    let mut func_evals = n + 1;

    let mut iterations = 0;
    loop {
        // Keep the simplex sorted by objective value
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| fvals[a].partial_cmp(&fvals[b]).unwrap_or(Ordering::Equal));
        vertices = order.iter().map(|&i| vertices[i].clone()).collect();
        fvals = order.iter().map(|&i| fvals[i]).collect();

        if abort_test() {
            return SimplexResult {
                x: vertices[0].clone(),
                fval: fvals[0],
                iterations,
                func_evals,
                converged: false,
                aborted: true,
                message: "Aborted by cancellation request".to_string(),
            };
        }

        let spread = fvals[n] - fvals[0];
        if spread <= (config.ftol * fvals[0].abs()).max(1e-12) {
            return SimplexResult {
                x: vertices[0].clone(),
                fval: fvals[0],
                iterations,
                func_evals,
                converged: true,
                aborted: false,
                message: format!(
                    "Objective convergence: spread = {:.2e} at f = {:.6e}",
                    spread, fvals[0]
                ),
            };
        }
        if iterations >= config.max_iterations {
            return SimplexResult {
                x: vertices[0].clone(),
                fval: fvals[0],
                iterations,
                func_evals,
                converged: false,
                aborted: false,
                message: format!("Maximum iterations ({}) reached", config.max_iterations),
            };
        }
        iterations += 1;

        // Centroid of all vertices except the worst
        let mut centroid: Array1<f64> = Array1::zeros(n);
        for v in vertices.iter().take(n) {
            centroid += v;
        }
        centroid /= n as f64;

        let direction = &centroid - &vertices[n];
        let reflected = &centroid + &(&direction * REFLECT);
        let f_reflected = objective(&reflected);
        func_evals += 1;

        if f_reflected < fvals[0] {
            // Try to expand past the reflection
            let expanded = &centroid + &(&direction * (REFLECT * EXPAND));
            let f_expanded = objective(&expanded);
            func_evals += 1;
            if f_expanded < f_reflected {
                vertices[n] = expanded;
                fvals[n] = f_expanded;
            } else {
                vertices[n] = reflected;
                fvals[n] = f_reflected;
            }
        } else if f_reflected < fvals[n - 1] {
            vertices[n] = reflected;
            fvals[n] = f_reflected;
        } else {
            // Contract, outside or inside depending on the reflection
            let (contracted, f_contracted) = if f_reflected < fvals[n] {
                let c = &centroid + &(&direction * (REFLECT * CONTRACT));
                let f = objective(&c);
                (c, f)
            } else {
                let c = &centroid - &(&direction * CONTRACT);
                let f = objective(&c);
                (c, f)
            };
            func_evals += 1;

            if f_contracted < f_reflected.min(fvals[n]) {
                vertices[n] = contracted;
                fvals[n] = f_contracted;
            } else {
                // Shrink everything toward the best vertex
                for i in 1..=n {
                    let shrunk = &vertices[0] + &(&(&vertices[i] - &vertices[0]) * SHRINK);
                    fvals[i] = objective(&shrunk);
                    vertices[i] = shrunk;
                }
                func_evals += n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_converges_on_quadratic_bowl() {
        let target = array![1.0, -2.0, 3.0];
        let objective = |x: &Array1<f64>| {
            x.iter()
                .zip(target.iter())
                .map(|(xi, ti)| (xi - ti) * (xi - ti))
                .sum::<f64>()
        };

        let x0 = array![0.0, 0.0, 0.0];
        let result = minimize(objective, &x0, &SimplexConfig::default(), || false);

        assert!(result.converged);
        assert!(!result.aborted);
        for i in 0..3 {
            assert_relative_eq!(result.x[i], target[i], epsilon = 1e-4);
        }
        assert!(result.fval < 1e-8);
    }

    #[test]
    fn test_converges_on_rosenbrock() {
        let objective = |x: &Array1<f64>| {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            a * a + 100.0 * b * b
        };

        let x0 = array![-1.2, 1.0];
        let result = minimize(objective, &x0, &SimplexConfig::default(), || false);

        assert!(result.converged, "{}", result.message);
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_abort_returns_best_so_far() {
        let objective = |x: &Array1<f64>| x.dot(x);
        let x0 = array![5.0, 5.0];
        let result = minimize(objective, &x0, &SimplexConfig::default(), || true);

        assert!(result.aborted);
        assert!(!result.converged);
        assert!(result.fval.is_finite());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_iteration_budget_is_respected() {
        let objective = |x: &Array1<f64>| x.dot(x);
        let x0 = array![100.0, -100.0, 50.0];
        let config = SimplexConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let result = minimize(objective, &x0, &config, || false);

        assert!(!result.converged);
        assert!(result.message.contains("Maximum iterations"));
        assert_eq!(result.iterations, 1);
    }
}
