use fenris_hetero::system::{PhaseConfig, TagRegistry, TagSet, MAX_TAGS};
use proptest::prelude::*;

#[test]
fn registering_a_known_tag_returns_its_id() {
    let mut registry = TagRegistry::new();
    assert_eq!(registry.add_vector_tag("solution").unwrap(), 0);
    assert_eq!(registry.add_vector_tag("residual").unwrap(), 1);
    assert_eq!(registry.add_vector_tag("solution").unwrap(), 0);
    assert_eq!(registry.num_vector_tags(), 2);

    assert_eq!(registry.vector_tag("residual").unwrap(), 1);
    assert_eq!(registry.vector_tag_name(1), Some("residual"));
    assert_eq!(registry.vector_tag_name(2), None);
}

#[test]
fn vector_and_matrix_tags_are_separate_namespaces() {
    let mut registry = TagRegistry::new();
    registry.add_vector_tag("time").unwrap();
    registry.add_vector_tag("nontime").unwrap();
    assert_eq!(registry.add_matrix_tag("nontime").unwrap(), 0);
    assert_eq!(registry.matrix_tag("nontime").unwrap(), 0);
    assert_eq!(registry.vector_tag("nontime").unwrap(), 1);

    let err = registry.matrix_tag("time").unwrap_err();
    assert_eq!(err.to_string(), "unknown matrix tag 'time'");
}

#[test]
fn registries_are_bounded() {
    let mut registry = TagRegistry::new();
    for i in 0..MAX_TAGS {
        registry.add_matrix_tag(&format!("tag{}", i)).unwrap();
    }
    assert!(registry.add_matrix_tag("one_too_many").is_err());
    assert!(registry.add_matrix_tag("tag3").is_ok());
    assert_eq!(registry.num_matrix_tags(), MAX_TAGS);
}

#[test]
fn tag_set_operations() {
    let mut set = TagSet::single(0).with(2).with(5);
    assert_eq!(set.len(), 3);
    assert!(set.contains(2));
    assert!(!set.contains(1));
    assert!(!set.contains(MAX_TAGS + 3));

    set.remove(2);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 5]);
    assert_eq!(set.truncated(5), TagSet::single(0));
    assert_eq!(set.intersection(TagSet::single(5).with(7)), TagSet::single(5));
    assert_eq!(set.union(TagSet::single(1)).len(), 3);
    assert_eq!(format!("{:?}", set), "{0, 5}");

    assert!(TagSet::empty().is_empty());
    assert_eq!(TagSet::all().len(), MAX_TAGS);
    assert_eq!([3, 1, 3].into_iter().collect::<TagSet>(), TagSet::single(1).with(3));
}

#[test]
#[should_panic(expected = "exceeds the maximum")]
fn tag_sets_reject_tags_beyond_the_maximum() {
    TagSet::empty().with(MAX_TAGS);
}

#[test]
fn phase_configs_select_their_tags() {
    let phase = PhaseConfig::residual(TagSet::single(1)).with_solution(TagSet::single(0), [0, 2]);
    assert_eq!(phase.residual_tags, TagSet::single(1));
    assert!(phase.matrix_tags.is_empty());
    assert_eq!(phase.solution_tags, TagSet::single(0));
    assert_eq!(phase.variables, vec![0, 2]);

    let phase = PhaseConfig::jacobian(TagSet::all());
    assert!(phase.residual_tags.is_empty());
    assert_eq!(phase.matrix_tags, TagSet::all());
}

proptest! {
    #[test]
    fn truncation_keeps_exactly_the_leading_tags(bits in any::<u64>(), count in 0..=MAX_TAGS + 2) {
        let set: TagSet = (0..MAX_TAGS).filter(|tag| bits & (1 << tag) != 0).collect();
        let truncated = set.truncated(count);
        for tag in 0..MAX_TAGS {
            prop_assert_eq!(truncated.contains(tag), set.contains(tag) && tag < count);
        }
    }
}
