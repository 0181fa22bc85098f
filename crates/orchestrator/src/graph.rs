//! Stage topology: which roles are routed from, which are routed into, and
//! the declared startup and teardown orders.

use std::collections::BTreeSet;

use trishul_common::StageRole;

/// Startup order. Grep comes first so its sink is installed into the
/// transport before any request is made; Seed comes last, after the 404
/// bootstrap.
pub const STARTUP_ORDER: [StageRole; 6] = [
    StageRole::Grep,
    StageRole::Auth,
    StageRole::Discovery,
    StageRole::Audit,
    StageRole::Bruteforce,
    StageRole::Seed,
];

/// Teardown order: the exact reverse of [`STARTUP_ORDER`]. Older scanners
/// joined in the fixed order Grep, Audit, Auth, Discovery, Bruteforce,
/// which let Grep stop while Audit could still send requests through it.
/// Here Seed stops first and Grep last.
pub const TEARDOWN_ORDER: [StageRole; 6] = reversed(STARTUP_ORDER);

const fn reversed(order: [StageRole; 6]) -> [StageRole; 6] {
    let mut out = order;
    let mut i = 0;
    while i < order.len() {
        out[i] = order[order.len() - 1 - i];
        i += 1;
    }
    out
}

/// A small directed graph of stage roles with two edge sets: the roles the
/// router pulls work from and the roles it fans work out to. A role may be
/// in both (self-feeding stages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    producers: Vec<StageRole>,
    consumers: Vec<StageRole>,
}

impl StageGraph {
    pub fn new(producers: Vec<StageRole>, consumers: Vec<StageRole>) -> Self {
        Self { producers, consumers }
    }

    /// Seed, Discovery and Bruteforce produce; Audit, Discovery and
    /// Bruteforce consume.
    pub fn standard() -> Self {
        Self::new(
            vec![StageRole::Seed, StageRole::Discovery, StageRole::Bruteforce],
            vec![StageRole::Audit, StageRole::Discovery, StageRole::Bruteforce],
        )
    }

    /// Keep only the roles that are actually instantiated.
    pub fn restrict_to(&self, live: &BTreeSet<StageRole>) -> Self {
        Self {
            producers: self.producers.iter().copied().filter(|r| live.contains(r)).collect(),
            consumers: self.consumers.iter().copied().filter(|r| live.contains(r)).collect(),
        }
    }

    /// Roles polled for results to route, in polling order.
    pub fn producers(&self) -> &[StageRole] {
        &self.producers
    }

    /// Roles every routed item is delivered to.
    pub fn consumers(&self) -> &[StageRole] {
        &self.consumers
    }

    pub fn is_producer(&self, role: StageRole) -> bool {
        self.producers.contains(&role)
    }

    pub fn is_consumer(&self, role: StageRole) -> bool {
        self.consumers.contains(&role)
    }

    /// Live roles that are not producers: polled only for failure reports.
    pub fn observed<'a>(&'a self, live: &'a BTreeSet<StageRole>) -> impl Iterator<Item = StageRole> + 'a {
        live.iter().copied().filter(move |r| !self.is_producer(*r))
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_is_reverse_of_startup() {
        assert_eq!(
            TEARDOWN_ORDER,
            [
                StageRole::Seed,
                StageRole::Bruteforce,
                StageRole::Audit,
                StageRole::Discovery,
                StageRole::Auth,
                StageRole::Grep,
            ]
        );
        let mut back = TEARDOWN_ORDER;
        back.reverse();
        assert_eq!(back, STARTUP_ORDER);
    }

    #[test]
    fn every_role_starts_exactly_once() {
        let unique: BTreeSet<_> = STARTUP_ORDER.iter().collect();
        assert_eq!(unique.len(), StageRole::ALL.len());
    }

    #[test]
    fn standard_graph_has_self_loops() {
        let graph = StageGraph::standard();
        assert!(graph.is_producer(StageRole::Discovery) && graph.is_consumer(StageRole::Discovery));
        assert!(graph.is_producer(StageRole::Bruteforce) && graph.is_consumer(StageRole::Bruteforce));
        assert!(!graph.is_consumer(StageRole::Seed));
        assert!(!graph.is_producer(StageRole::Audit));
    }

    #[test]
    fn restriction_drops_absent_roles() {
        let live: BTreeSet<_> = [StageRole::Seed, StageRole::Audit, StageRole::Grep].into_iter().collect();
        let graph = StageGraph::standard().restrict_to(&live);
        assert_eq!(graph.producers(), &[StageRole::Seed]);
        assert_eq!(graph.consumers(), &[StageRole::Audit]);

        let observed: Vec<_> = graph.observed(&live).collect();
        assert_eq!(observed, vec![StageRole::Audit, StageRole::Grep]);
    }

    #[test]
    fn empty_configuration_has_no_edges() {
        let graph = StageGraph::standard().restrict_to(&BTreeSet::new());
        assert!(graph.producers().is_empty());
        assert!(graph.consumers().is_empty());
    }
}
