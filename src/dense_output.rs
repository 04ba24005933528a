// dense_output.rs

/// Continuous extension of the last accepted step.
pub trait DenseOutput {
    fn call(&self, t: f64) -> Vec<f64>;
}

/// Interpolating polynomial of a BDF step, built from the backward
/// differences `d[0..=order]` around the step end `t`.
#[derive(Debug, Clone)]
pub struct BdfDenseOutput {
    d: Vec<Vec<f64>>,
    t_shift: Vec<f64>,
    denom: Vec<f64>,
}

impl BdfDenseOutput {
    pub fn new(t: f64, h: f64, order: usize, d: Vec<Vec<f64>>) -> Self {
        let t_shift: Vec<f64> = (0..order).map(|i| t - h * i as f64).collect();
        let denom: Vec<f64> = (0..order).map(|i| h * (1.0 + i as f64)).collect();

        Self { d, t_shift, denom }
    }
}

impl DenseOutput for BdfDenseOutput {
    fn call(&self, t: f64) -> Vec<f64> {
        let mut y = self.d[0].clone();
        let mut p = 1.0;
        for ((shift, den), dj) in self.t_shift.iter().zip(&self.denom).zip(&self.d[1..]) {
            p *= (t - shift) / den;
            for (yi, &dji) in y.iter_mut().zip(dj) {
                *yi += dji * p;
            }
        }
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reproduces_quadratic() {
        // y(t) = t^2 sampled at t = 1, 0.5, 0 with h = 0.5:
        // D0 = y(1) = 1, D1 = y(1) - y(0.5) = 0.75, D2 = D1 - (y(0.5) - y(0)) = 0.5
        let dense = BdfDenseOutput::new(1.0, 0.5, 2, vec![vec![1.0], vec![0.75], vec![0.5]]);
        for &t in &[0.5, 0.6, 0.75, 0.9, 1.0] {
            assert_relative_eq!(dense.call(t)[0], t * t, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_linear_order_one() {
        // y(t) = 3t, step from 1 to 2
        let dense = BdfDenseOutput::new(2.0, 1.0, 1, vec![vec![6.0], vec![3.0]]);
        assert_relative_eq!(dense.call(1.5)[0], 4.5, epsilon = 1e-12);
        assert_relative_eq!(dense.call(1.0)[0], 3.0, epsilon = 1e-12);
    }
}
