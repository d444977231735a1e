//! Order reconciliation: diff a new aggregate against its persisted snapshot.
//!
//! ```text
//! original    new         staged (in order)
//! --------    ---------   ------------------------------------------
//! none        O           Added(O) [, Added(T)]
//! O           O           Modified(O)
//! O + T       O + T       Modified(O), Modified(T)
//! O           O + T       Modified(O), Added(T)
//! O + T1      O           Modified(O), Deleted(T1)
//! O + T1      O + T2      Modified(O), Deleted(T1), Added(T2)
//! ```
//!
//! The delete of a replaced time is always staged before the insert of its
//! successor: storage allows one live time per order, so the old row has to
//! be gone before the new one references the same owner.
//!
//! The engine is synchronous and does no IO. The whole plan is validated
//! against the tracking table before anything is staged.

use tracing::debug;

use ordertrack_orders::InternalOrder;

use crate::error::RepositoryError;
use crate::tracking::{Operation, StagedEntry, TrackingTable};

/// What the caller asserts about the persisted state of the order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Presence {
    /// Create when absent, update when present.
    Any,
    /// The order must already be persisted.
    MustExist,
}

/// Compute the operations that move storage from `original` to `new_order`.
///
/// Pure: the tracking table is not consulted. See [`reconcile`].
pub fn plan(
    new_order: &InternalOrder,
    original: Option<&InternalOrder>,
    presence: Presence,
) -> Result<Vec<StagedEntry>, RepositoryError> {
    let Some(original) = original else {
        if presence == Presence::MustExist {
            return Err(RepositoryError::not_found(format!(
                "order {} vanished before reconciliation",
                new_order.id_typed()
            )));
        }
        let mut planned = vec![StagedEntry::order(Operation::Added, new_order)];
        if let Some(time) = new_order.time() {
            planned.push(StagedEntry::time(Operation::Added, time));
        }
        return Ok(planned);
    };

    if original.id_typed() != new_order.id_typed() {
        return Err(RepositoryError::conflict(format!(
            "snapshot of order {} cannot reconcile order {}",
            original.id_typed(),
            new_order.id_typed()
        )));
    }

    let mut planned = vec![StagedEntry::order(Operation::Modified, new_order)];
    match (original.time(), new_order.time()) {
        (None, None) => {}
        (None, Some(added)) => planned.push(StagedEntry::time(Operation::Added, added)),
        (Some(orphan), None) => planned.push(StagedEntry::time(Operation::Deleted, orphan)),
        (Some(old), Some(current)) if old.id_typed() == current.id_typed() => {
            planned.push(StagedEntry::time(Operation::Modified, current));
        }
        (Some(old), Some(current)) => {
            planned.push(StagedEntry::time(Operation::Deleted, old));
            planned.push(StagedEntry::time(Operation::Added, current));
        }
    }
    Ok(planned)
}

/// Reconcile `new_order` against `original` and stage the result.
///
/// Returns the entries staged by this call, in staging order. On error the
/// tracking table is left exactly as it was.
pub fn reconcile(
    table: &mut TrackingTable,
    new_order: &InternalOrder,
    original: Option<&InternalOrder>,
    presence: Presence,
) -> Result<Vec<StagedEntry>, RepositoryError> {
    let planned = plan(new_order, original, presence)?;
    table.stage_all(planned.clone())?;

    debug!(
        order_id = %new_order.id_typed(),
        staged = planned.len(),
        tracked = table.len(),
        "reconciled order"
    );
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordertrack_core::{EntityKind, OrderId, OrderTimeId};
    use ordertrack_orders::{OrderNumber, OrderTime};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn new_order(with_time: bool) -> InternalOrder {
        let mut order = InternalOrder::new(OrderNumber::work_order(1));
        if with_time {
            order.set_time(OrderTime::new("Test"));
        }
        order
    }

    /// Simulate what a store returns after committing `order`.
    fn persisted(order: &InternalOrder) -> InternalOrder {
        let time = order.time().map(|t| {
            OrderTime::from_parts(t.id_typed(), t.display(), order.id_typed(), 1)
        });
        InternalOrder::from_parts(order.id_typed(), order.order_number().clone(), 1, time).unwrap()
    }

    fn ops(entries: &[StagedEntry]) -> Vec<(EntityKind, Operation, Uuid)> {
        entries.iter().map(|e| (e.kind(), e.operation, e.key())).collect()
    }

    fn order_key(order: &InternalOrder) -> Uuid {
        *order.id_typed().as_uuid()
    }

    fn time_key(order: &InternalOrder) -> Uuid {
        *order.time().unwrap().id_typed().as_uuid()
    }

    #[test]
    fn unpersisted_order_is_added_with_its_time() {
        let order = new_order(true);
        let mut table = TrackingTable::new();
        let staged = reconcile(&mut table, &order, None, Presence::Any).unwrap();

        assert_eq!(
            ops(&staged),
            vec![
                (EntityKind::Order, Operation::Added, order_key(&order)),
                (EntityKind::OrderTime, Operation::Added, time_key(&order)),
            ]
        );
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unchanged_order_is_still_modified() {
        let original = persisted(&new_order(false));
        let current = original.clone();
        let mut table = TrackingTable::new();
        let staged = reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();
        assert_eq!(ops(&staged), vec![(EntityKind::Order, Operation::Modified, order_key(&current))]);
    }

    #[test]
    fn time_edited_in_place_is_modified() {
        let original = persisted(&new_order(true));
        let mut current = original.clone();
        current.time_mut().unwrap().set_display("Edited");

        let mut table = TrackingTable::new();
        let staged = reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();
        assert_eq!(
            ops(&staged),
            vec![
                (EntityKind::Order, Operation::Modified, order_key(&current)),
                (EntityKind::OrderTime, Operation::Modified, time_key(&current)),
            ]
        );
    }

    #[test]
    fn time_attached_to_existing_order_is_added() {
        let original = persisted(&new_order(false));
        let mut current = original.clone();
        current.set_time(OrderTime::new("Later"));

        let mut table = TrackingTable::new();
        let staged = reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();
        assert_eq!(staged[1].operation, Operation::Added);
        assert_eq!(staged[1].key(), time_key(&current));
    }

    #[test]
    fn removed_time_is_deleted_once_across_repeated_reconciles() {
        let original = persisted(&new_order(true));
        let orphan = time_key(&original);
        let mut current = original.clone();
        current.remove_time();

        let mut table = TrackingTable::new();
        reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();
        reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();

        let drained = table.drain();
        let deletes: Vec<_> = drained
            .iter()
            .filter(|e| e.operation == Operation::Deleted)
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].key(), orphan);
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn orphan_delete_reuses_existing_entry() {
        let original = persisted(&new_order(true));
        let mut edited = original.time().unwrap().clone();
        edited.set_display("Edited elsewhere");

        let mut table = TrackingTable::new();
        table
            .stage(StagedEntry::time(Operation::Modified, &edited))
            .unwrap();

        let mut current = original.clone();
        current.remove_time();
        reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(edited.id_typed()), Some(Operation::Deleted));
    }

    #[test]
    fn replaced_time_is_deleted_before_successor_is_added() {
        let original = persisted(&new_order(true));
        let old = time_key(&original);
        let mut current = original.clone();
        current.set_time(OrderTime::new("Test 1234"));

        let mut table = TrackingTable::new();
        reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();

        assert_eq!(
            ops(&table.drain()),
            vec![
                (EntityKind::Order, Operation::Modified, order_key(&current)),
                (EntityKind::OrderTime, Operation::Deleted, old),
                (EntityKind::OrderTime, Operation::Added, time_key(&current)),
            ]
        );
    }

    #[test]
    fn missing_snapshot_with_must_exist_is_not_found() {
        let order = new_order(true);
        let mut table = TrackingTable::new();
        let err = reconcile(&mut table, &order, None, Presence::MustExist).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_of_another_order_is_rejected() {
        let original = persisted(&new_order(false));
        let current = new_order(false);
        let mut table = TrackingTable::new();
        let err = reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn second_instance_in_same_session_conflicts() {
        let original = persisted(&new_order(true));
        let mut first = original.clone();
        first.set_time(OrderTime::new("First"));
        let mut second = original.clone();
        second.set_time(OrderTime::new("Second"));

        let mut table = TrackingTable::new();
        reconcile(&mut table, &first, Some(&original), Presence::Any).unwrap();
        let before = table.entries().into_iter().cloned().collect::<Vec<_>>();

        let err = reconcile(&mut table, &second, Some(&original), Presence::Any).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        let after = table.entries().into_iter().cloned().collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn clearing_the_aggregate_allows_a_new_instance() {
        let original = persisted(&new_order(true));
        let mut first = original.clone();
        first.set_time(OrderTime::new("First"));
        let mut second = original.clone();
        second.set_time(OrderTime::new("Second"));

        let mut table = TrackingTable::new();
        reconcile(&mut table, &first, Some(&original), Presence::Any).unwrap();
        assert_eq!(table.clear_aggregate(first.id_typed()), 3);

        reconcile(&mut table, &second, Some(&original), Presence::Any).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(first.time().unwrap().id_typed()), None);
        assert_eq!(table.lookup(second.time().unwrap().id_typed()), Some(Operation::Added));
    }

    /// Shape of an order for property tests: which time (if any) it owns.
    fn time_slot() -> impl Strategy<Value = Option<u8>> {
        prop::option::of(0u8..3)
    }

    fn build(order_id: OrderId, times: &[OrderTimeId], slot: Option<u8>, version: u64) -> InternalOrder {
        let time = slot.map(|i| OrderTime::from_parts(times[i as usize], format!("t{i}"), order_id, version));
        InternalOrder::from_parts(order_id, OrderNumber::work_order(9), version, time).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: without a snapshot only Added is staged, root first.
        #[test]
        fn no_snapshot_stages_only_added(slot in time_slot()) {
            let order_id = OrderId::new();
            let times = [OrderTimeId::new(), OrderTimeId::new(), OrderTimeId::new()];
            let order = build(order_id, &times, slot, 0);

            let staged = plan(&order, None, Presence::Any).unwrap();
            prop_assert_eq!(staged.len(), 1 + usize::from(slot.is_some()));
            prop_assert!(staged.iter().all(|e| e.operation == Operation::Added));
            prop_assert_eq!(staged[0].kind(), EntityKind::Order);
        }

        /// Property: a snapshot always yields Modified for the root, every
        /// identity appears once, and deletes precede adds.
        #[test]
        fn snapshot_plans_are_well_formed(before in time_slot(), after in time_slot()) {
            let order_id = OrderId::new();
            let times = [OrderTimeId::new(), OrderTimeId::new(), OrderTimeId::new()];
            let original = build(order_id, &times, before, 1);
            let current = build(order_id, &times, after, 1);

            let staged = plan(&current, Some(&original), Presence::MustExist).unwrap();
            prop_assert_eq!(staged[0].kind(), EntityKind::Order);
            prop_assert_eq!(staged[0].operation, Operation::Modified);

            let mut keys: Vec<Uuid> = staged.iter().map(StagedEntry::key).collect();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), staged.len());

            if let Some(add) = staged.iter().position(|e| e.operation == Operation::Added) {
                if let Some(del) = staged.iter().position(|e| e.operation == Operation::Deleted) {
                    prop_assert!(del < add);
                }
            }

            match (before, after) {
                (Some(a), Some(b)) if a == b => {
                    prop_assert_eq!(staged.len(), 2);
                    prop_assert_eq!(staged[1].operation, Operation::Modified);
                }
                (Some(_), Some(_)) => prop_assert_eq!(staged.len(), 3),
                (None, None) => prop_assert_eq!(staged.len(), 1),
                _ => prop_assert_eq!(staged.len(), 2),
            }
        }

        /// Property: reconciling the same instance twice stages nothing new.
        #[test]
        fn reconcile_is_idempotent_for_one_instance(before in time_slot(), after in time_slot()) {
            let order_id = OrderId::new();
            let times = [OrderTimeId::new(), OrderTimeId::new(), OrderTimeId::new()];
            let original = build(order_id, &times, before, 1);
            let current = build(order_id, &times, after, 1);

            let mut table = TrackingTable::new();
            let first = reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();
            reconcile(&mut table, &current, Some(&original), Presence::Any).unwrap();

            prop_assert_eq!(table.drain(), first);
        }
    }
}
