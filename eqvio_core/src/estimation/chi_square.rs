// eqvio_core/src/estimation/chi_square.rs

//! Chi-square quantiles for innovation gating.
//!
//! Uses the Wilson–Hilferty cube-root approximation on top of Acklam's
//! rational approximation of the inverse normal CDF. The relative error is
//! below 1% from two degrees of freedom up, which is the smallest residual
//! the updater ever gates.

/// Standard normal quantile `Φ⁻¹(p)` for `p ∈ (0, 1)`.
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Quantile of the chi-square distribution with `dof` degrees of freedom.
pub fn chi_square_quantile(confidence: f64, dof: usize) -> f64 {
    let k = dof.max(1) as f64;
    let z = normal_quantile(confidence);
    let h = 2.0 / (9.0 * k);
    let cube = 1.0 - h + z * h.sqrt();
    k * cube.max(0.0).powi(3)
}

/// Memoized thresholds for one confidence level.
#[derive(Debug, Clone)]
pub struct ChiSquareTable {
    confidence: f64,
    thresholds: Vec<f64>,
}

impl ChiSquareTable {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            thresholds: Vec::new(),
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn threshold(&mut self, dof: usize) -> f64 {
        while self.thresholds.len() <= dof {
            let k = self.thresholds.len();
            self.thresholds.push(chi_square_quantile(self.confidence, k));
        }
        self.thresholds[dof]
    }
}
