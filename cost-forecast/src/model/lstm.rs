//! Recurrent forecaster: one LSTM layer with a direct multi-horizon head.
//!
//! Each context step feeds `[value, covariate_1, ..]` into the cell; the
//! final hidden state is projected to all `horizon` outputs at once.
//! Gradients are computed analytically by backpropagation through time.
//!
//! Gate rows in the fused weight matrices are ordered input, forget,
//! candidate, output.

use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::calibration::{Calibration, IntervalMethod};
use super::{ensure_context_shape, ForecastModel, IntervalForecast};
use crate::error::{EngineResult, ForecastError};
use crate::windows::{ContextWindow, Window};

/// Architecture and initialization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LstmConfig {
    /// Hidden state size.
    pub hidden_size: usize,
    /// Seed for weight initialization.
    pub init_seed: u64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden_size: 16,
            init_seed: 42,
        }
    }
}

impl LstmConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            ..Self::default()
        }
    }

    pub fn with_init_seed(mut self, seed: u64) -> Self {
        self.init_seed = seed;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LstmWeights {
    /// input -> gates [4H x I]
    w_x: Array2<f64>,
    /// hidden -> gates [4H x H]
    w_h: Array2<f64>,
    /// gate bias [4H]
    bias: Array1<f64>,
    /// hidden -> outputs [O x H]
    w_out: Array2<f64>,
    /// output bias [O]
    b_out: Array1<f64>,
}

impl LstmWeights {
    fn zeros(input: usize, hidden: usize, outputs: usize) -> Self {
        Self {
            w_x: Array2::zeros((4 * hidden, input)),
            w_h: Array2::zeros((4 * hidden, hidden)),
            bias: Array1::zeros(4 * hidden),
            w_out: Array2::zeros((outputs, hidden)),
            b_out: Array1::zeros(outputs),
        }
    }

    fn init(input: usize, hidden: usize, outputs: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (1.0 / hidden as f64).sqrt();
        let mut uniform = |rows: usize, cols: usize| {
            Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
        };

        let w_x = uniform(4 * hidden, input);
        let w_h = uniform(4 * hidden, hidden);
        let w_out = uniform(outputs, hidden);

        let mut bias = Array1::zeros(4 * hidden);
        // Forget gate starts open.
        bias.slice_mut(s![hidden..2 * hidden]).fill(1.0);

        Self {
            w_x,
            w_h,
            bias,
            w_out,
            b_out: Array1::zeros(outputs),
        }
    }

    fn count(input: usize, hidden: usize, outputs: usize) -> usize {
        4 * hidden * input + 4 * hidden * hidden + 4 * hidden + outputs * hidden + outputs
    }

    fn flatten(&self) -> Vec<f64> {
        self.w_x
            .iter()
            .chain(self.w_h.iter())
            .chain(self.bias.iter())
            .chain(self.w_out.iter())
            .chain(self.b_out.iter())
            .copied()
            .collect()
    }

    fn from_flat(input: usize, hidden: usize, outputs: usize, params: &[f64]) -> EngineResult<Self> {
        let expected = Self::count(input, hidden, outputs);
        if params.len() != expected {
            return Err(ForecastError::ShapeMismatch {
                what: "lstm parameters".to_string(),
                expected,
                actual: params.len(),
            });
        }

        let mut offset = 0;
        let mut take = |len: usize| {
            let chunk = params[offset..offset + len].to_vec();
            offset += len;
            chunk
        };
        let shape_err = |e: ndarray::ShapeError| ForecastError::InvalidConfig(format!("lstm weight shape: {}", e));

        let w_x = Array2::from_shape_vec((4 * hidden, input), take(4 * hidden * input)).map_err(shape_err)?;
        let w_h = Array2::from_shape_vec((4 * hidden, hidden), take(4 * hidden * hidden)).map_err(shape_err)?;
        let bias = Array1::from_vec(take(4 * hidden));
        let w_out = Array2::from_shape_vec((outputs, hidden), take(outputs * hidden)).map_err(shape_err)?;
        let b_out = Array1::from_vec(take(outputs));

        Ok(Self {
            w_x,
            w_h,
            bias,
            w_out,
            b_out,
        })
    }
}

/// Activations kept from the forward pass for one time step.
struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    tanh_c: Array1<f64>,
}

/// LSTM sequence-to-horizon forecaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmForecaster {
    context_length: usize,
    horizon: usize,
    covariate_width: usize,
    hidden_size: usize,
    weights: LstmWeights,
    calibration: Option<Calibration>,
}

impl LstmForecaster {
    pub fn new(
        context_length: usize,
        horizon: usize,
        covariate_width: usize,
        config: &LstmConfig,
    ) -> EngineResult<Self> {
        if context_length == 0 || horizon == 0 || config.hidden_size == 0 {
            return Err(ForecastError::InvalidConfig(format!(
                "lstm needs positive context_length ({}), horizon ({}) and hidden_size ({})",
                context_length, horizon, config.hidden_size
            )));
        }

        Ok(Self {
            context_length,
            horizon,
            covariate_width,
            hidden_size: config.hidden_size,
            weights: LstmWeights::init(
                1 + covariate_width,
                config.hidden_size,
                horizon,
                config.init_seed,
            ),
            calibration: None,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    fn input_size(&self) -> usize {
        1 + self.covariate_width
    }

    fn step_inputs(&self, context: &ContextWindow) -> Vec<Array1<f64>> {
        (0..context.len())
            .map(|t| {
                let mut x = Vec::with_capacity(self.input_size());
                x.push(context.values[t]);
                x.extend(context.covariates.iter().map(|column| column[t]));
                Array1::from_vec(x)
            })
            .collect()
    }

    fn forward(&self, context: &ContextWindow) -> (Array1<f64>, Array1<f64>, Vec<StepCache>) {
        let hs = self.hidden_size;
        let w = &self.weights;
        let mut h = Array1::<f64>::zeros(hs);
        let mut c = Array1::<f64>::zeros(hs);
        let mut caches = Vec::with_capacity(context.len());

        for x in self.step_inputs(context) {
            let z = w.w_x.dot(&x) + w.w_h.dot(&h) + &w.bias;
            let i = z.slice(s![0..hs]).mapv(sigmoid);
            let f = z.slice(s![hs..2 * hs]).mapv(sigmoid);
            let g = z.slice(s![2 * hs..3 * hs]).mapv(f64::tanh);
            let o = z.slice(s![3 * hs..4 * hs]).mapv(sigmoid);

            let c_next = &f * &c + &i * &g;
            let tanh_c = c_next.mapv(f64::tanh);
            let h_next = &o * &tanh_c;

            caches.push(StepCache {
                x,
                h_prev: h,
                c_prev: c,
                i,
                f,
                g,
                o,
                tanh_c,
            });
            h = h_next;
            c = c_next;
        }

        let y = w.w_out.dot(&h) + &w.b_out;
        (y, h, caches)
    }

    fn backward(&self, caches: &[StepCache], h_last: &Array1<f64>, dy: &Array1<f64>) -> LstmWeights {
        let hs = self.hidden_size;
        let w = &self.weights;
        let mut grad = LstmWeights::zeros(self.input_size(), hs, self.horizon);

        grad.w_out = outer(dy, h_last);
        grad.b_out = dy.clone();

        let mut dh = w.w_out.t().dot(dy);
        let mut dc = Array1::<f64>::zeros(hs);

        for cache in caches.iter().rev() {
            let d_o = &dh * &cache.tanh_c;
            dc = dc + &dh * &cache.o * &cache.tanh_c.mapv(|t| 1.0 - t * t);

            let d_i = &dc * &cache.g;
            let d_g = &dc * &cache.i;
            let d_f = &dc * &cache.c_prev;

            let mut dz = Array1::<f64>::zeros(4 * hs);
            dz.slice_mut(s![0..hs])
                .assign(&(d_i * &cache.i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![hs..2 * hs])
                .assign(&(d_f * &cache.f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![2 * hs..3 * hs])
                .assign(&(d_g * &cache.g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![3 * hs..4 * hs])
                .assign(&(d_o * &cache.o.mapv(|v| v * (1.0 - v))));

            grad.w_x += &outer(&dz, &cache.x);
            grad.w_h += &outer(&dz, &cache.h_prev);
            grad.bias += &dz;

            dh = w.w_h.t().dot(&dz);
            dc = &dc * &cache.f;
        }

        grad
    }
}

impl ForecastModel for LstmForecaster {
    fn name(&self) -> &'static str {
        "lstm"
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn covariate_width(&self) -> usize {
        self.covariate_width
    }

    fn predict(&self, context: &ContextWindow) -> EngineResult<Vec<f64>> {
        ensure_context_shape(self, context)?;
        let (y, _, _) = self.forward(context);
        Ok(y.to_vec())
    }

    fn predict_with_uncertainty(
        &self,
        context: &ContextWindow,
    ) -> EngineResult<Option<IntervalForecast>> {
        let point = self.predict(context)?;
        Ok(self.calibration.as_ref().map(|cal| IntervalForecast {
            lower: point
                .iter()
                .zip(&cal.half_widths)
                .map(|(p, w)| p - w)
                .collect(),
            upper: point
                .iter()
                .zip(&cal.half_widths)
                .map(|(p, w)| p + w)
                .collect(),
            point,
            level: cal.level,
        }))
    }

    fn parameter_count(&self) -> usize {
        LstmWeights::count(self.input_size(), self.hidden_size, self.horizon)
    }

    fn parameters(&self) -> Vec<f64> {
        self.weights.flatten()
    }

    fn set_parameters(&mut self, params: &[f64]) -> EngineResult<()> {
        self.weights = LstmWeights::from_flat(self.input_size(), self.hidden_size, self.horizon, params)?;
        Ok(())
    }

    fn loss_and_gradient(&self, window: &Window) -> EngineResult<(f64, Vec<f64>)> {
        ensure_context_shape(self, &window.context)?;
        if window.target.len() != self.horizon {
            return Err(ForecastError::ShapeMismatch {
                what: format!("target length of window at position {}", window.position),
                expected: self.horizon,
                actual: window.target.len(),
            });
        }

        let (y, h_last, caches) = self.forward(&window.context);
        let diff = &y - &Array1::from_vec(window.target.clone());
        let n = self.horizon as f64;
        let loss = diff.mapv(|d| d * d).sum() / n;
        let dy = diff.mapv(|d| 2.0 * d / n);

        Ok((loss, self.backward(&caches, &h_last, &dy).flatten()))
    }

    fn supports_uncertainty(&self) -> bool {
        true
    }

    fn clear_calibration(&mut self) {
        self.calibration = None;
    }

    fn calibrate(&mut self, windows: &[Window], level: f64, method: IntervalMethod) -> EngineResult<()> {
        let residuals = windows
            .iter()
            .map(|w| {
                let pred = self.predict(&w.context)?;
                Ok(w.target.iter().zip(&pred).map(|(t, p)| t - p).collect())
            })
            .collect::<EngineResult<Vec<Vec<f64>>>>()?;
        self.calibration = Some(Calibration::fit(&residuals, level, method)?);
        Ok(())
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(r, c)| a[r] * b[c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SegmentRole;
    use chrono::NaiveDate;

    fn window(values: Vec<f64>, covariates: Vec<Vec<f64>>, target: Vec<f64>) -> Window {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Window {
            position: 0,
            role: SegmentRole::Train,
            context: ContextWindow::new(values).with_covariates(covariates),
            target_timestamps: vec![ts; target.len()],
            target,
            origin: ts,
        }
    }

    #[test]
    fn test_output_shape() {
        let model = LstmForecaster::new(6, 3, 0, &LstmConfig::new(8)).unwrap();
        let pred = model.predict(&ContextWindow::new(vec![0.1; 6])).unwrap();
        assert_eq!(pred.len(), 3);
        assert!(pred.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_shape_mismatch() {
        let model = LstmForecaster::new(6, 3, 0, &LstmConfig::new(8)).unwrap();
        assert!(matches!(
            model.predict(&ContextWindow::new(vec![0.1; 5])),
            Err(ForecastError::ShapeMismatch { expected: 6, actual: 5, .. })
        ));
    }

    #[test]
    fn test_seeded_init_is_deterministic() {
        let config = LstmConfig::new(4).with_init_seed(7);
        let a = LstmForecaster::new(5, 2, 1, &config).unwrap();
        let b = LstmForecaster::new(5, 2, 1, &config).unwrap();
        assert_eq!(a, b);

        let c = LstmForecaster::new(5, 2, 1, &config.clone().with_init_seed(8)).unwrap();
        assert_ne!(a.parameters(), c.parameters());
    }

    #[test]
    fn test_parameter_round_trip() {
        let mut model = LstmForecaster::new(4, 2, 1, &LstmConfig::new(3)).unwrap();
        let params = model.parameters();
        assert_eq!(params.len(), model.parameter_count());

        let shifted: Vec<f64> = params.iter().map(|p| p + 0.5).collect();
        model.set_parameters(&shifted).unwrap();
        assert_eq!(model.parameters(), shifted);

        assert!(model.set_parameters(&shifted[1..]).is_err());
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let mut model = LstmForecaster::new(4, 2, 1, &LstmConfig::new(3).with_init_seed(11)).unwrap();
        let w = window(
            vec![0.3, -0.2, 0.5, 0.1],
            vec![vec![1.0, 0.5, -0.5, 0.2]],
            vec![0.4, -0.1],
        );

        let (_, analytic) = model.loss_and_gradient(&w).unwrap();
        let base = model.parameters();
        let eps = 1e-6;

        for k in 0..base.len() {
            let mut plus = base.clone();
            plus[k] += eps;
            model.set_parameters(&plus).unwrap();
            let loss_plus = model.loss(&w).unwrap();

            let mut minus = base.clone();
            minus[k] -= eps;
            model.set_parameters(&minus).unwrap();
            let loss_minus = model.loss(&w).unwrap();

            let numeric = (loss_plus - loss_minus) / (2.0 * eps);
            let tol = 1e-6 + 1e-4 * numeric.abs();
            assert!(
                (numeric - analytic[k]).abs() < tol,
                "param {}: numeric {} vs analytic {}",
                k,
                numeric,
                analytic[k]
            );
        }
    }

    #[test]
    fn test_uncertainty_requires_calibration() {
        let mut model = LstmForecaster::new(3, 2, 0, &LstmConfig::new(4)).unwrap();
        let ctx = ContextWindow::new(vec![0.0, 0.1, 0.2]);
        assert!(model.predict_with_uncertainty(&ctx).unwrap().is_none());

        let windows = vec![
            window(vec![0.0, 0.1, 0.2], vec![], vec![0.3, 0.4]),
            window(vec![0.1, 0.2, 0.3], vec![], vec![0.4, 0.5]),
            window(vec![0.2, 0.3, 0.4], vec![], vec![0.5, 0.6]),
        ];
        model.calibrate(&windows, 0.9, IntervalMethod::Conformal).unwrap();

        let interval = model.predict_with_uncertainty(&ctx).unwrap().unwrap();
        assert_eq!(interval.level, 0.9);
        for h in 0..2 {
            assert!(interval.lower[h] <= interval.point[h]);
            assert!(interval.upper[h] >= interval.point[h]);
        }
    }
}
