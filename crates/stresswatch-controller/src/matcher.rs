use stresswatch_core::NetworkChaos;

/// Select the fault resources whose `testInstance` selector equals
/// `test_instance`.
///
/// Equality is exact. Every match is returned, so several experiments
/// provisioned for the same test instance are activated together. Resources
/// without a `testInstance` selector never match.
pub fn matching_fault_resources<'a, I>(test_instance: &str, candidates: I) -> Vec<&'a NetworkChaos>
where
    I: IntoIterator<Item = &'a NetworkChaos>,
{
    candidates
        .into_iter()
        .filter(|chaos| chaos.test_instance() == Some(test_instance))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stresswatch_core::TEST_INSTANCE_LABEL;

    fn chaos(name: &str, instance: &str) -> NetworkChaos {
        NetworkChaos::new("ns", name).with_selector(TEST_INSTANCE_LABEL, instance)
    }

    fn names(matches: &[&NetworkChaos]) -> Vec<String> {
        matches
            .iter()
            .filter_map(|c| c.metadata.name.clone())
            .collect()
    }

    #[test]
    fn test_exact_match_only() {
        let candidates = vec![chaos("a", "A"), chaos("b", "B"), chaos("c", "C")];
        let matches = matching_fault_resources("B", &candidates);
        assert_eq!(names(&matches), vec!["b"]);
    }

    #[test]
    fn test_no_prefix_or_case_folding() {
        let candidates = vec![chaos("a", "t1-extra"), chaos("b", "T1"), chaos("c", "t")];
        assert!(matching_fault_resources("t1", &candidates).is_empty());
    }

    #[test]
    fn test_all_ties_are_returned() {
        let candidates = vec![chaos("a", "t1"), chaos("b", "t2"), chaos("c", "t1")];
        let matches = matching_fault_resources("t1", &candidates);
        assert_eq!(names(&matches), vec!["a", "c"]);
    }

    #[test]
    fn test_empty_and_unselected_candidates() {
        let empty: Vec<NetworkChaos> = Vec::new();
        assert!(matching_fault_resources("t1", &empty).is_empty());

        let unselected = vec![NetworkChaos::new("ns", "bare").with_selector("app", "t1")];
        assert!(matching_fault_resources("t1", &unselected).is_empty());
    }
}
