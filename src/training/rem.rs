/// Random ensemble mixture (REM) over K Q-value heads
///
/// A convex combination of the heads is used as the Q estimate. The spread of
/// the heads can be subtracted as a pessimism penalty; the spread is treated as
/// a constant for gradients.
use candle_core::{Result, Tensor, D};
use rand::Rng;

/// Draw K weights from U(0, 1) and normalize them to sum to 1
pub fn random_coefficients<R: Rng + ?Sized>(num_heads: usize, rng: &mut R) -> Vec<f32> {
    let draws: Vec<f32> = (0..num_heads).map(|_| rng.gen::<f32>()).collect();
    let total: f32 = draws.iter().sum();

    if total > 0.0 {
        draws.into_iter().map(|w| w / total).collect()
    } else {
        uniform_coefficients(num_heads)
    }
}

/// `1 / K` for every head
pub fn uniform_coefficients(num_heads: usize) -> Vec<f32> {
    vec![1.0 / num_heads as f32; num_heads]
}

/// Weighted sum over the ensemble axis
///
/// # Arguments
/// * `q` - Ensemble Q-values [batch, items, K]
/// * `coefficients` - Mixture weights [K]
///
/// # Returns
/// [batch, items]
pub fn mix_heads(q: &Tensor, coefficients: &Tensor) -> Result<Tensor> {
    let num_heads = coefficients.dim(0)?;
    q.broadcast_mul(&coefficients.reshape((1, 1, num_heads))?)?
        .sum(D::Minus1)
}

/// Population standard deviation over the ensemble axis, [batch, items, K] -> [batch, items]
pub fn ensemble_std(q: &Tensor) -> Result<Tensor> {
    let mean = q.mean_keepdim(D::Minus1)?;
    q.broadcast_sub(&mean)?
        .sqr()?
        .mean(D::Minus1)?
        .sqrt()
}

/// `mix_heads(q, coefficients) - penalty * std(q)`, std detached
///
/// A zero penalty skips the std computation entirely.
pub fn penalized_q(q: &Tensor, coefficients: &Tensor, penalty: f64) -> Result<Tensor> {
    let mixed = mix_heads(q, coefficients)?;
    if penalty == 0.0 {
        return Ok(mixed);
    }

    let spread = ensemble_std(q)?.detach();
    mixed - (spread * penalty)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_coefficients_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(7);

        for k in [1, 2, 15] {
            let coefficients = random_coefficients(k, &mut rng);
            assert_eq!(coefficients.len(), k);
            assert!(coefficients.iter().all(|&w| (0.0..=1.0).contains(&w)));

            let total: f32 = coefficients.iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_uniform_coefficients() {
        assert_eq!(uniform_coefficients(4), vec![0.25; 4]);
    }

    #[test]
    fn test_mix_and_std() -> Result<()> {
        let device = Device::Cpu;

        // One state, two items, two heads
        let q = Tensor::new(&[[[1.0f32, 3.0], [2.0, 2.0]]], &device)?;
        let coefficients = Tensor::new(&[0.25f32, 0.75], &device)?;

        let mixed = mix_heads(&q, &coefficients)?;
        assert_eq!(mixed.to_vec2::<f32>()?, vec![vec![2.5, 2.0]]);

        let std = ensemble_std(&q)?;
        assert_eq!(std.to_vec2::<f32>()?, vec![vec![1.0, 0.0]]);

        let penalized = penalized_q(&q, &coefficients, 0.5)?;
        assert_eq!(penalized.to_vec2::<f32>()?, vec![vec![2.0, 2.0]]);

        Ok(())
    }

    #[test]
    fn test_penalty_carries_no_gradient() -> Result<()> {
        let device = Device::Cpu;

        let q = Var::from_tensor(&Tensor::new(&[[[1.0f32, 3.0]]], &device)?)?;
        let coefficients = Tensor::new(&[0.5f32, 0.5], &device)?;

        let with_penalty = penalized_q(q.as_tensor(), &coefficients, 10.0)?.sum_all()?;
        let grads = with_penalty.backward()?;
        let grad = grads
            .get(q.as_tensor())
            .map(|g| g.flatten_all())
            .transpose()?
            .map(|g| g.to_vec1::<f32>())
            .transpose()?;

        // Only the mixture contributes: d/dq = coefficients
        assert_eq!(grad, Some(vec![0.5, 0.5]));

        Ok(())
    }
}
