/// Double Q-learning loss
use candle_core::{Result, Tensor};

/// Per-example outputs of [`double_q_learning`]
#[derive(Debug, Clone)]
pub struct DoubleQOutput {
    /// `0.5 * td_error^2` [batch]
    pub loss: Tensor,
    /// `target - Q(s, a)` [batch]
    pub td_error: Tensor,
    /// Bootstrapped target, gradient-free [batch]
    pub target: Tensor,
    /// `Q(s, a)` [batch]
    pub q_indexed: Tensor,
}

/// `values[i, indices[i]]` for every row
///
/// # Arguments
/// * `values` - [batch, num_actions]
/// * `indices` - u32 action ids [batch]
pub fn batched_index(values: &Tensor, indices: &Tensor) -> Result<Tensor> {
    let indices = indices.unsqueeze(1)?.contiguous()?;
    values.gather(&indices, 1)?.squeeze(1)
}

/// Double Q-learning TD loss
///
/// The action for the bootstrap target is selected with `q_t_selector`
/// (main network) and evaluated with `q_t_value` (target network):
/// `target = r_t + pcont_t * q_t_value[argmax(q_t_selector)]`.
///
/// # Arguments
/// * `q_tm1` - Q-values at the current state [batch, num_actions]
/// * `a_tm1` - Taken actions, u32 [batch]
/// * `r_t` - Rewards [batch]
/// * `pcont_t` - Discounts, zero ends bootstrapping [batch]
/// * `q_t_value` - Target network Q-values at the next state [batch, num_actions]
/// * `q_t_selector` - Main network Q-values at the next state [batch, num_actions]
pub fn double_q_learning(
    q_tm1: &Tensor,
    a_tm1: &Tensor,
    r_t: &Tensor,
    pcont_t: &Tensor,
    q_t_value: &Tensor,
    q_t_selector: &Tensor,
) -> Result<DoubleQOutput> {
    let best_action = q_t_selector.argmax_keepdim(1)?.squeeze(1)?;
    let bootstrap = batched_index(q_t_value, &best_action)?;

    let target = (r_t + pcont_t.mul(&bootstrap)?)?.detach();
    let q_indexed = batched_index(q_tm1, a_tm1)?;

    let td_error = (&target - &q_indexed)?;
    let loss = (td_error.sqr()? * 0.5)?;

    Ok(DoubleQOutput {
        loss,
        td_error,
        target,
        q_indexed,
    })
}
