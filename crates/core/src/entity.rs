//! Entity trait: identity shared by every mirrored record.

use crate::id::EntityId;

/// A record the mirror keeps in an ordered collection and addresses by id.
pub trait Entity {
    /// Returns the entity identifier.
    fn id(&self) -> EntityId;
}

/// Index of the entity with `id` in `items`, if present.
pub fn position_of<T: Entity>(items: &[T], id: EntityId) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}

/// Replace the entity with the same id, or append it when absent.
pub fn upsert<T: Entity>(items: &mut Vec<T>, item: T) {
    match position_of(items, item.id()) {
        Some(idx) => items[idx] = item,
        None => items.push(item),
    }
}
