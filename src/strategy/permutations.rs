//! Plackett-Luce permutation engine.
//!
//! Enumerates every ordered K-tuple of the strongest `top_n` runners and
//! prices it with sequential Plackett-Luce: at each finishing position the
//! chosen runner's strength is divided by the strength of everyone not yet
//! placed. The top-N set is treated as the whole population.

use tracing::debug;

use crate::types::{PermutationLine, PlannerError, RatedRunner};

/// The strongest `top_n` runners, kept in their input order.
pub fn select_top_n(rated: &[RatedRunner], top_n: usize) -> Vec<RatedRunner> {
    if top_n >= rated.len() {
        return rated.to_vec();
    }
    let mut order: Vec<usize> = (0..rated.len()).collect();
    order.sort_by(|&a, &b| rated[b].strength.total_cmp(&rated[a].strength));
    let mut keep: Vec<usize> = order.into_iter().take(top_n).collect();
    keep.sort_unstable();
    keep.into_iter().map(|i| rated[i].clone()).collect()
}

/// Enumerate and price all K-permutations of the top-N runners.
///
/// Output is sorted by probability descending. Equal probabilities keep
/// enumeration order, which is lexicographic in input position, so the
/// result is deterministic for a given input order.
pub fn enumerate_lines(
    rated: &[RatedRunner],
    k: usize,
    top_n: usize,
) -> Result<Vec<PermutationLine>, PlannerError> {
    if k == 0 {
        return Err(PlannerError::Validation(
            "bet arity must be at least 1".to_string(),
        ));
    }
    if let Some(bad) = rated
        .iter()
        .find(|r| !r.strength.is_finite() || r.strength <= 0.0)
    {
        return Err(PlannerError::Validation(format!(
            "runner {} has non-positive strength {}",
            bad.id, bad.strength
        )));
    }

    let pool = select_top_n(rated, top_n);
    if pool.len() < k {
        debug!(pool = pool.len(), k, "Fewer runners than bet arity, no lines");
        return Ok(Vec::new());
    }

    let total: f64 = pool.iter().map(|r| r.strength).sum();
    let mut walk = Walk {
        pool: &pool,
        k,
        used: vec![false; pool.len()],
        path: Vec::with_capacity(k),
        lines: Vec::new(),
    };
    walk.descend(1.0, total);
    let mut lines = walk.lines;

    lines.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    for (i, line) in lines.iter_mut().enumerate() {
        line.rank = i + 1;
    }

    debug!(
        runners = pool.len(),
        k,
        lines = lines.len(),
        "Permutation lines enumerated"
    );
    Ok(lines)
}

struct Walk<'a> {
    pool: &'a [RatedRunner],
    k: usize,
    used: Vec<bool>,
    path: Vec<usize>,
    lines: Vec<PermutationLine>,
}

impl Walk<'_> {
    fn descend(&mut self, prefix: f64, remaining: f64) {
        if self.path.len() == self.k {
            let pool = self.pool;
            let line = PermutationLine {
                runner_ids: self.path.iter().map(|&i| pool[i].id.clone()).collect(),
                numbers: self.path.iter().map(|&i| pool[i].number).collect(),
                probability: prefix,
                rank: 0,
            };
            self.lines.push(line);
            return;
        }
        for i in 0..self.pool.len() {
            if self.used[i] {
                continue;
            }
            let s = self.pool[i].strength;
            self.used[i] = true;
            self.path.push(i);
            self.descend(prefix * s / remaining, remaining - s);
            self.path.pop();
            self.used[i] = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
