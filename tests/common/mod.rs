//! Shared fixtures for the integration tests.

use ndarray::Array1;
use prift::Invertor;

pub const SPHERE_RADIUS: f64 = 80.0;
pub const SPHERE_D_MAX: f64 = 160.0;

/// Form factor intensity of a homogeneous sphere of radius `radius`,
/// normalized to 1 at q = 0.
pub fn sphere_intensity(q: f64, radius: f64) -> f64 {
    let qr = q * radius;
    let amplitude = 3.0 * (qr.sin() - qr * qr.cos()) / (qr * qr * qr);
    amplitude * amplitude
}

/// Analytic distance distribution of a homogeneous sphere, normalized to
/// unit mass in x = r / (2 radius).
pub fn sphere_pr(r: f64, radius: f64) -> f64 {
    let d = 2.0 * radius;
    if r <= 0.0 || r >= d {
        return 0.0;
    }
    let x = r / d;
    12.0 * x * x * (1.0 - x) * (1.0 - x) * (2.0 + x)
}

/// Noise-free sphere dataset on 101 q points with 5% error bars, set up
/// for inversion at the correct d_max.
pub fn sphere_invertor() -> Invertor {
    let n = 101;
    let q = Array1::from_shape_fn(n, |i| {
        0.001 + (0.25 - 0.001) * i as f64 / (n - 1) as f64
    });
    let y = q.mapv(|qi| sphere_intensity(qi, SPHERE_RADIUS));
    let y_max = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let err = y.mapv(|yi| (0.05 * yi).max(1e-4 * y_max));

    let mut inv = Invertor::new();
    inv.set_d_max(SPHERE_D_MAX).unwrap();
    inv.set_alpha(7e-4).unwrap();
    inv.set_data(q, y, err).unwrap();
    inv
}
