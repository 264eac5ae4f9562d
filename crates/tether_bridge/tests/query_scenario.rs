use std::collections::HashSet;
use tether_bridge::components::{register_all, ParentComponent};
use tether_bridge::{BridgeConfig, BridgeWorld, CachingStrategy, ComponentMetaRegistry, ComponentType, Token, Value};

fn world() -> BridgeWorld {
    let registry = ComponentMetaRegistry::new();
    register_all(&registry).unwrap();
    let mut world = BridgeWorld::new(1, &BridgeConfig::default(), &registry).unwrap();
    for name in ["A", "B"] {
        world
            .register_script_component(name, &[("v".to_string(), "int".to_string())])
            .unwrap();
    }
    world
}

fn v(n: i64) -> Value {
    [("v", Value::Int(n))].into_iter().collect()
}

fn sorted(mut tokens: Vec<Token>) -> Vec<Token> {
    tokens.sort();
    tokens
}

#[test]
fn ten_thousand_entity_scenario() {
    let mut world = world();
    let mut entities = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let e = world.create_entity().unwrap();
        if i < 6_000 {
            world.add_component(e, "A", &v(i)).unwrap();
        }
        if (3_000..9_000).contains(&i) {
            world.add_component(e, "B", &v(i)).unwrap();
        }
        entities.push(e);
    }

    let a = world.create_query(&["A"]).unwrap();
    let ab = world.create_query(&["A", "B"]).unwrap();
    world.query_set_caching_strategy(a, CachingStrategy::CacheEntities).unwrap();
    assert_eq!(world.query_get_entities(a).unwrap().len(), 6_000);
    assert_eq!(world.query_get_entities(ab).unwrap().len(), 3_000);

    // A-only entities gaining B still match [A].
    for &e in &entities[..100] {
        world.add_component(e, "B", &v(-1)).unwrap();
    }
    assert_eq!(world.query_get_entities(a).unwrap().len(), 6_000);
    assert_eq!(world.query_get_entities(ab).unwrap().len(), 3_100);

    for &e in &entities[3_000..3_500] {
        assert!(world.remove_component(e, "A").unwrap());
    }
    let matched = world.query_get_entities(a).unwrap();
    assert_eq!(matched.len(), 5_500);
    assert!(matched.iter().all(|t| !entities[3_000..3_500].contains(t)));
    assert_eq!(world.query_get_entities(ab).unwrap().len(), 2_600);
}

#[test]
fn cached_reads_match_uncached_reads() {
    let mut world = world();
    let mut entities = Vec::new();
    for i in 0..200 {
        let e = world.create_entity().unwrap();
        world.add_component(e, "A", &v(i)).unwrap();
        if i % 3 == 0 {
            world.add_component(e, "B", &v(i * 10)).unwrap();
        }
        entities.push(e);
    }

    let reference = world.create_query(&["A", "B"]).unwrap();
    world.query_set_caching_strategy(reference, CachingStrategy::NoCache).unwrap();
    let entities_cached = world.create_query(&["A", "B"]).unwrap();
    world
        .query_set_caching_strategy(entities_cached, CachingStrategy::CacheEntities)
        .unwrap();
    let full_cached = world.create_query(&["A", "B"]).unwrap();
    world.query_set_caching_strategy(full_cached, CachingStrategy::CacheFull).unwrap();

    let check = |world: &mut BridgeWorld| {
        let expected = sorted(world.query_get_entities(reference).unwrap());
        assert_eq!(sorted(world.query_get_entities(entities_cached).unwrap()), expected);
        assert_eq!(sorted(world.query_get_entities(full_cached).unwrap()), expected);

        let mut expected_records = world.query_get_entities_with_components(reference).unwrap();
        let mut records = world.query_get_entities_with_components(full_cached).unwrap();
        expected_records.sort_by_key(|r| r.entity);
        records.sort_by_key(|r| r.entity);
        assert_eq!(records, expected_records);
    };

    check(&mut world);

    // Each mutation kind the observers cover.
    world.add_component(entities[1], "B", &v(7)).unwrap();
    check(&mut world);
    world.set_component(entities[0], "B", &v(99)).unwrap();
    check(&mut world);
    world.remove_component(entities[3], "A").unwrap();
    check(&mut world);
    world.destroy_entity(entities[6]).unwrap();
    check(&mut world);

    let records = world.query_get_entities_with_components(full_cached).unwrap();
    let first = records.iter().find(|r| r.entity == entities[0]).unwrap();
    assert_eq!(first.components.get("B"), Some(&v(99)));
}

#[test]
fn empty_query_matches_every_entity() {
    for size in [0usize, 1, 1_500] {
        let mut world = world();
        let mut expected = HashSet::new();
        for i in 0..size {
            let e = world.create_entity().unwrap();
            if i % 2 == 0 {
                world.add_component(e, "A", &v(i as i64)).unwrap();
            }
            expected.insert(e);
        }

        let all = world.create_query(&[]).unwrap();
        assert_eq!(world.query_get_entity_count(all).unwrap(), size);
        let matched: HashSet<Token> = world.query_get_entities(all).unwrap().into_iter().collect();
        assert_eq!(matched, expected);

        // Spawns after the first read are picked up.
        let late = world.create_entity().unwrap();
        let matched = world.query_get_entities(all).unwrap();
        assert_eq!(matched.len(), size + 1);
        assert!(matched.contains(&late));
    }
}

#[test]
fn name_filter_tracks_renames() {
    let mut world = world();
    let hero = world.create_entity_with_name("Hero").unwrap();
    let _ = world.create_entity_with_name("Villain").unwrap();
    world.add_component(hero, "A", &v(1)).unwrap();

    let query = world.create_query(&[]).unwrap();
    world.query_set_name_filter(query, Some("Her*")).unwrap();
    assert_eq!(world.query_get_entities(query).unwrap(), vec![hero]);

    world.set_entity_name(hero, Some("Zero")).unwrap();
    assert!(world.query_get_entities(query).unwrap().is_empty());
}

#[test]
fn full_cache_drops_references_to_destroyed_entities() {
    let mut world = world();
    let parent = world.create_entity().unwrap();
    let child = world.create_entity().unwrap();
    let linked: Value = [("parent", parent.to_value())].into_iter().collect();
    world.add_component(child, ParentComponent::NAME, &linked).unwrap();

    let query = world.create_query(&[ParentComponent::NAME]).unwrap();
    world.query_set_caching_strategy(query, CachingStrategy::CacheFull).unwrap();
    let records = world.query_get_entities_with_components(query).unwrap();
    assert_eq!(records[0].components[ParentComponent::NAME], linked);

    world.destroy_entity(parent).unwrap();
    let orphaned: Value = [("parent", Value::Nil)].into_iter().collect();
    assert_eq!(world.get_component(child, ParentComponent::NAME).unwrap(), orphaned);
    let records = world.query_get_entities_with_components(query).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity, child);
    assert_eq!(records[0].components[ParentComponent::NAME], orphaned);
}
