// query.rs - Structured component queries
//
// A query is an ordered set of required component ids. Iteration drives
// from the smallest column and tests membership in the others, so the cost
// is bounded by the rarest component. A query with no terms matches
// nothing; callers wanting "every entity" use `World::each_raw_while`.

use crate::ecs::{ComponentId, EntityId, World};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Query {
    terms: Vec<ComponentId>,
}

impl Query {
    /// Build a query; terms are sorted and deduplicated.
    pub fn new<I>(terms: I) -> Self
    where
        I: IntoIterator<Item = ComponentId>,
    {
        let mut terms: Vec<ComponentId> = terms.into_iter().collect();
        terms.sort_unstable();
        terms.dedup();
        Self { terms }
    }

    pub fn terms(&self) -> &[ComponentId] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether `entity` is alive and carries every term.
    pub fn matches(&self, world: &World, entity: EntityId) -> bool {
        !self.terms.is_empty()
            && world.is_alive(entity)
            && self.terms.iter().all(|&cid| world.has_component(entity, cid))
    }

    /// Visit matching entities until `f` returns `false`.
    pub fn each_while<F>(&self, world: &World, mut f: F)
    where
        F: FnMut(EntityId) -> bool,
    {
        if self.terms.is_empty() {
            return;
        }

        let mut columns = Vec::with_capacity(self.terms.len());
        for &cid in &self.terms {
            match world.column(cid) {
                Some(col) => columns.push(col),
                // A term nobody has ever added cannot match.
                None => return,
            }
        }
        columns.sort_by_key(|col| col.len());

        let (driver, rest) = columns.split_at(1);
        for &slot in driver[0].entities() {
            if rest.iter().all(|col| col.contains(slot)) {
                let Some(entity) = world.entity_at_slot(slot) else {
                    continue;
                };
                if !f(entity) {
                    return;
                }
            }
        }
    }

    /// Visit every matching entity.
    pub fn each<F>(&self, world: &World, mut f: F)
    where
        F: FnMut(EntityId),
    {
        self.each_while(world, |entity| {
            f(entity);
            true
        });
    }

    pub fn count(&self, world: &World) -> usize {
        let mut n = 0;
        self.each(world, |_| n += 1);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_matches_nothing() {
        let mut world = World::new();
        world.spawn();
        assert_eq!(Query::new([]).count(&world), 0);
    }

    #[test]
    fn intersects_all_terms() {
        let mut world = World::new();
        let a = world.register_component("A", 4, 4, None).unwrap();
        let b = world.register_component("B", 4, 4, None).unwrap();
        for i in 0..10u32 {
            let e = world.spawn();
            world.set_component(e, a, &i.to_ne_bytes()).unwrap();
            if i % 2 == 0 {
                world.set_component(e, b, &i.to_ne_bytes()).unwrap();
            }
        }
        assert_eq!(Query::new([a]).count(&world), 10);
        assert_eq!(Query::new([a, b]).count(&world), 5);
        assert_eq!(Query::new([b, a, b]).terms(), &[a, b]);
    }

    #[test]
    fn each_while_stops_early() {
        let mut world = World::new();
        let a = world.register_component("A", 0, 1, None).unwrap();
        for _ in 0..10 {
            let e = world.spawn();
            world.add_component(e, a).unwrap();
        }
        let mut seen = 0;
        Query::new([a]).each_while(&world, |_| {
            seen += 1;
            seen < 3
        });
        assert_eq!(seen, 3);
    }
}
