use fenris_hetero::dispatch::{DispatchConfig, ResidualObjectParams};
use fenris_hetero::memory_pool::MemoryPoolConfig;
use fenris_hetero::space::MemorySpace;
use fenris_hetero::system::{PhaseConfig, TagRegistry, TagSet};

#[test]
fn dispatch_config_fills_missing_fields_with_defaults() {
    let config: DispatchConfig = serde_json::from_str(r#"{ "space": "Host" }"#).unwrap();
    assert_eq!(config.space, MemorySpace::Host);
    assert_eq!(config.min_items_per_task, DispatchConfig::default().min_items_per_task);

    let config: DispatchConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, DispatchConfig::default());
    assert_eq!(config.space, MemorySpace::Device);
}

#[test]
fn memory_pool_config_requires_all_fields() {
    let config: MemoryPoolConfig = serde_json::from_str(r#"{ "ways": 4, "way_capacity": 128 }"#).unwrap();
    assert_eq!(config.ways, 4);
    assert_eq!(config.way_capacity, 128);
    assert!(serde_json::from_str::<MemoryPoolConfig>(r#"{ "ways": 4 }"#).is_err());
}

#[test]
fn object_params_contribute_to_every_tag_by_default() {
    let params: ResidualObjectParams = serde_json::from_str(r#"{ "name": "diffusion", "blocks": [1] }"#).unwrap();
    assert_eq!(params.name, "diffusion");
    assert_eq!(params.variable, 0);
    assert_eq!(params.blocks, vec![1]);
    assert!(params.boundaries.is_empty());
    assert_eq!(params.vector_tags, TagSet::all());
    assert_eq!(params.matrix_tags, TagSet::all());
}

#[test]
fn tag_sets_serialize_as_bitmasks() {
    let phase = PhaseConfig::residual(TagSet::single(0).with(2)).with_solution(TagSet::single(1), [0]);
    let json = serde_json::to_value(&phase).unwrap();
    assert_eq!(json["residual_tags"], 5);
    assert_eq!(json["solution_tags"], 2);

    let restored: PhaseConfig = serde_json::from_value(json).unwrap();
    assert_eq!(restored, phase);
}

#[test]
fn registries_round_trip_through_json() {
    let mut registry = TagRegistry::new();
    registry.add_vector_tag("solution").unwrap();
    registry.add_matrix_tag("system").unwrap();
    let json = serde_json::to_string(&registry).unwrap();
    let restored: TagRegistry = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, registry);
    assert_eq!(restored.matrix_tag("system").unwrap(), 0);
}
