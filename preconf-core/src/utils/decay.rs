/// Returns the share of the bid (0-100) still owed after decay.
///
/// The bid decays linearly from 100 at `decay_start` to 0 at `decay_end`;
/// `dispatched_at` is when the builder dispatched the commitment. An empty or
/// inverted decay window means the bid does not decay.
pub fn residual_bid_percent(decay_start: u64, decay_end: u64, dispatched_at: u64) -> u64 {
    if decay_end <= decay_start || dispatched_at <= decay_start {
        return 100;
    }
    if dispatched_at >= decay_end {
        return 0;
    }
    let elapsed = u128::from(dispatched_at - decay_start);
    let total = u128::from(decay_end - decay_start);
    // elapsed < total, so the decayed share stays below 100
    let decayed = (elapsed * 100 / total) as u64;
    100 - decayed
}
