//! Bid scoring and winner ranking.

use std::cmp::Ordering;
use tender_core::{Bid, ScoringWeights};

/// A bid together with the score it earned.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBid {
    pub bid: Bid,
    pub score: f64,
    pub busy: bool,
}

/// Score one bid.
///
/// `busy` is true when the bidder already carries load at evaluation time.
pub fn score_bid(weights: &ScoringWeights, bid: &Bid, busy: bool) -> f64 {
    let capability = weights.capability_weight * bid.capability_score;
    let time_bonus = (weights.time_bonus_max - bid.estimated_time / weights.time_divisor).max(0.0);
    let confidence = weights.confidence_weight * bid.confidence;
    let busy_penalty = if busy { weights.busy_penalty } else { 0.0 };
    let distance_penalty = bid
        .distance
        .map(|d| (d * weights.distance_penalty_per_unit).min(weights.distance_penalty_cap))
        .unwrap_or(0.0);

    capability + time_bonus + confidence - busy_penalty - distance_penalty
}

/// Winner-first ordering: highest score, then earliest submission, then
/// arrival sequence.
pub fn rank_order(a: &ScoredBid, b: &ScoredBid) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.bid.submitted_at.cmp(&b.bid.submitted_at))
        .then_with(|| a.bid.sequence.cmp(&b.bid.sequence))
}

/// Drop bids under `min_capability`, score the rest and sort winner first.
pub fn rank_bids<F>(
    weights: &ScoringWeights,
    min_capability: f64,
    bids: &[Bid],
    mut is_busy: F,
) -> Vec<ScoredBid>
where
    F: FnMut(&Bid) -> bool,
{
    let mut ranked: Vec<ScoredBid> = bids
        .iter()
        .filter(|bid| bid.capability_score >= min_capability)
        .map(|bid| {
            let busy = is_busy(bid);
            ScoredBid {
                bid: bid.clone(),
                score: score_bid(weights, bid, busy),
                busy,
            }
        })
        .collect();
    ranked.sort_by(rank_order);
    ranked
}
