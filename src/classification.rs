//! Interface to the classification lattice: explicitly out of scope per
//! spec.md §1. The finalizer only needs the lattice's `max` (least upper
//! bound) operation to fold a submission's base classification with every
//! result's reported classification.

/// A total order over classification labels, least to most restrictive.
/// Real deployments plug in the actual lattice; this ranked list is a
/// reasonable stand-in used by the in-crate tests.
pub trait ClassificationLattice: Send + Sync {
    fn max(&self, a: &str, b: &str) -> String;
}

pub struct RankedLattice {
    /// Labels ordered from least to most restrictive. A label absent from
    /// this list is treated as maximally restrictive, matching the
    /// fail-closed posture of a real classification lattice.
    rank: Vec<String>,
}

impl RankedLattice {
    pub fn new(rank: Vec<String>) -> Self {
        Self { rank }
    }

    fn rank_of(&self, label: &str) -> usize {
        self.rank
            .iter()
            .position(|r| r == label)
            .unwrap_or(self.rank.len())
    }
}

impl ClassificationLattice for RankedLattice {
    fn max(&self, a: &str, b: &str) -> String {
        if self.rank_of(a) >= self.rank_of(b) {
            a.to_string()
        } else {
            b.to_string()
        }
    }
}
