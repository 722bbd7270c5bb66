//! Admission Planner (spec.md §4.2) — a pure function from
//! (target model, resident models, VRAM snapshot, protected set) to a
//! `Plan`. No I/O, no locking, no CS access: everything it needs is
//! passed in, which is what makes it the one module this crate can test
//! exhaustively without a fake store or a fake runtime.

use std::collections::HashSet;

use crate::runtime::ResidentModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The target model is already resident; nothing to evict or load.
    AlreadyLoaded,
    /// Enough free VRAM exists without evicting anything.
    LoadDirect,
    /// Evicting exactly this set of models (in this order) frees enough
    /// VRAM for the target to load.
    LoadAfterOffload(Vec<String>),
    /// No reachable eviction set frees enough VRAM — either every
    /// unprotected resident is needed and still isn't enough, or the
    /// model alone exceeds total capacity (see `ModelExceedsVram`,
    /// raised by the caller before `plan` is even invoked).
    InsufficientVram,
}

/// Candidate for eviction: an unprotected resident model with its VRAM
/// footprint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    name: String,
    size_vram_bytes: u64,
}

/// Exhaustive subset enumeration is only tractable up to this many
/// candidates; past it we fall back to a greedy largest-first packing.
/// 20 candidates is 2^20 subsets, ~1M — still sub-millisecond, and far
/// past any realistic number of concurrently resident models on one GPU.
const EXHAUSTIVE_LIMIT: usize = 20;

pub fn plan(
    model: &str,
    needed_bytes: u64,
    residents: &[ResidentModel],
    vram_total: u64,
    vram_free: u64,
    protected: &HashSet<String>,
) -> Plan {
    if residents.iter().any(|r| r.name == model) {
        return Plan::AlreadyLoaded;
    }
    if needed_bytes <= vram_free {
        return Plan::LoadDirect;
    }
    if needed_bytes > vram_total {
        return Plan::InsufficientVram;
    }

    let candidates: Vec<Candidate> = residents
        .iter()
        .filter(|r| !protected.contains(&r.name))
        .map(|r| Candidate {
            name: r.name.clone(),
            size_vram_bytes: r.size_vram_bytes,
        })
        .collect();

    let shortfall = needed_bytes - vram_free;

    let chosen = if candidates.len() <= EXHAUSTIVE_LIMIT {
        smallest_sufficient_subset(&candidates, shortfall)
    } else {
        greedy_largest_first(&candidates, shortfall)
    };

    match chosen {
        Some(names) => Plan::LoadAfterOffload(names),
        None => Plan::InsufficientVram,
    }
}

/// Enumerate every subset, keep only those that cover `shortfall`, and
/// pick the best by the spec's deterministic tie-break: fewest bytes
/// freed, then fewest models evicted, then lexicographically first by
/// sorted model names. Freeing the least is preferred so the planner
/// doesn't evict more than it has to.
fn smallest_sufficient_subset(candidates: &[Candidate], shortfall: u64) -> Option<Vec<String>> {
    let n = candidates.len();
    let mut best: Option<(u64, usize, Vec<String>)> = None;

    for mask in 1u32..(1u32 << n) {
        let mut bytes = 0u64;
        let mut names = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            if mask & (1 << i) != 0 {
                bytes += candidate.size_vram_bytes;
                names.push(candidate.name.clone());
            }
        }
        if bytes < shortfall {
            continue;
        }
        names.sort();
        let key = (bytes, names.len());
        let better = match &best {
            None => true,
            Some((best_bytes, best_len, best_names)) => {
                key < (*best_bytes, *best_len) || (key == (*best_bytes, *best_len) && names < *best_names)
            }
        };
        if better {
            best = Some((bytes, names.len(), names));
        }
    }

    best.map(|(_, _, names)| names)
}

/// Fallback for large candidate pools: sort by descending VRAM size so
/// the evicted set stays small, break remaining ties lexicographically
/// for determinism, then take from the front until the shortfall is
/// covered. Not guaranteed minimal-bytes, but bounded and deterministic.
fn greedy_largest_first(candidates: &[Candidate], shortfall: u64) -> Option<Vec<String>> {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        b.size_vram_bytes
            .cmp(&a.size_vram_bytes)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut bytes = 0u64;
    let mut names = Vec::new();
    for candidate in sorted {
        if bytes >= shortfall {
            break;
        }
        bytes += candidate.size_vram_bytes;
        names.push(candidate.name.clone());
    }

    if bytes >= shortfall {
        names.sort();
        Some(names)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident(name: &str, size_vram_bytes: u64) -> ResidentModel {
        ResidentModel {
            name: name.to_string(),
            size_bytes: size_vram_bytes,
            size_vram_bytes,
        }
    }

    #[test]
    fn already_loaded_short_circuits() {
        let residents = vec![resident("llama3", 4_000)];
        let got = plan("llama3", 4_000, &residents, 10_000, 1_000, &HashSet::new());
        assert_eq!(got, Plan::AlreadyLoaded);
    }

    #[test]
    fn loads_direct_when_free_vram_suffices() {
        let residents = vec![];
        let got = plan("llama3", 4_000, &residents, 10_000, 5_000, &HashSet::new());
        assert_eq!(got, Plan::LoadDirect);
    }

    #[test]
    fn model_larger_than_total_is_insufficient() {
        let got = plan("huge", 20_000, &[], 10_000, 10_000, &HashSet::new());
        assert_eq!(got, Plan::InsufficientVram);
    }

    #[test]
    fn evicts_minimal_set_to_cover_shortfall() {
        let residents = vec![resident("a", 2_000), resident("b", 3_000), resident("c", 6_000)];
        // free=1000, need 5000 -> shortfall 4000. {c} alone covers it with
        // fewer bytes freed than {a,b} (5000) or {a,c}/{b,c}.
        let got = plan("target", 5_000, &residents, 10_000, 1_000, &HashSet::new());
        assert_eq!(got, Plan::LoadAfterOffload(vec!["c".to_string()]));
    }

    #[test]
    fn never_evicts_protected_models() {
        let residents = vec![resident("a", 2_000), resident("b", 8_000)];
        let mut protected = HashSet::new();
        protected.insert("b".to_string());
        // free=1000, need 3000 -> shortfall 2000, only "a" is eligible.
        let got = plan("target", 3_000, &residents, 10_000, 1_000, &protected);
        assert_eq!(got, Plan::LoadAfterOffload(vec!["a".to_string()]));
    }

    #[test]
    fn insufficient_when_unprotected_residents_dont_cover_shortfall() {
        let residents = vec![resident("a", 1_000)];
        let mut protected = HashSet::new();
        protected.insert("b".to_string());
        let got = plan("target", 9_000, &residents, 10_000, 500, &protected);
        assert_eq!(got, Plan::InsufficientVram);
    }

    #[test]
    fn tie_break_prefers_fewer_models_then_lexicographic() {
        // Two singletons of equal size both cover the shortfall; fewer
        // models (1 vs 2) wins outright, so this mostly exercises that
        // among equal-size singletons the lexicographically first name
        // is chosen.
        let residents = vec![resident("zeta", 4_000), resident("alpha", 4_000)];
        let got = plan("target", 4_000, &residents, 10_000, 1_000, &HashSet::new());
        assert_eq!(got, Plan::LoadAfterOffload(vec!["alpha".to_string()]));
    }
}
