use std::sync::Arc;

use bifrost_model::{BifrostError, ProviderId};
use rand::Rng;

use crate::key::Key;

/// Pluggable key-selection strategy.
///
/// The engine calls this on every dequeue with the full key snapshot for the
/// target provider; callers may inject their own (e.g. to honour a
/// direct-key header) via the init config. The default is
/// [`weighted_key_selector`].
pub type KeySelector =
    Arc<dyn Fn(&ProviderId, &str, &[Key]) -> Result<Key, BifrostError> + Send + Sync>;

pub fn weighted_key_selector() -> KeySelector {
    Arc::new(|provider, model, keys| select_weighted(provider, model, keys))
}

/// Weight-proportional choice among the keys eligible for `model`.
///
/// Draws once uniformly in `[0, total)` over the cumulative weights. If every
/// eligible weight is zero the draw degenerates to a uniform pick instead of
/// failing.
pub fn select_weighted(
    provider: &ProviderId,
    model: &str,
    keys: &[Key],
) -> Result<Key, BifrostError> {
    let eligible: Vec<&Key> = keys.iter().filter(|k| k.supports_model(model)).collect();
    if eligible.is_empty() {
        return Err(BifrostError::no_eligible_key(provider, model));
    }

    let total: f64 = eligible.iter().map(|k| k.weight.max(0.0)).sum();
    if total <= 0.0 {
        let idx = rand::rng().random_range(0..eligible.len());
        return Ok(eligible[idx].clone());
    }

    let draw = rand::rng().random_range(0.0..total);
    Ok(pick_cumulative(&eligible, draw).clone())
}

fn pick_cumulative<'a>(eligible: &[&'a Key], draw: f64) -> &'a Key {
    let mut acc = 0.0;
    for key in eligible {
        acc += key.weight.max(0.0);
        if draw < acc {
            return key;
        }
    }
    // Floating-point accumulation can land the draw a hair past the last
    // bucket boundary.
    eligible[eligible.len() - 1]
}
