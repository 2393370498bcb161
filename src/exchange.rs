// 🔄 Exchange Coordinator - atomic two-sided ownership swap
//
// One transaction: re-validate ownership, write two audit records, move two
// ledger rows. Either all four writes commit or none do.

use crate::db::{self, Event, ExchangeRecord, OwnershipRecord};
use crate::error::{EngineError, EngineResult};
use crate::fault::{ExchangeStep, FaultPlan};
use crate::store::{CancelToken, Store};
use crate::validation;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// `from_account_id` gives `item_id_1` and receives `item_id_2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub item_id_1: i64,
    pub item_id_2: i64,
}

impl ExchangeParams {
    pub fn new(from_account_id: i64, to_account_id: i64, item_id_1: i64, item_id_2: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            item_id_1,
            item_id_2,
        }
    }

    /// Shape checks only; nothing here touches the store
    pub fn validate(&self) -> EngineResult<()> {
        validation::require_positive("from_account_id", self.from_account_id)?;
        validation::require_positive("to_account_id", self.to_account_id)?;
        validation::require_positive("item_id_1", self.item_id_1)?;
        validation::require_positive("item_id_2", self.item_id_2)?;

        if self.from_account_id == self.to_account_id {
            return Err(EngineError::Validation(format!(
                "cannot exchange with self (account {})",
                self.from_account_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub exchange_1: ExchangeRecord,
    pub exchange_2: ExchangeRecord,
    pub gallery_1: OwnershipRecord,
    pub gallery_2: OwnershipRecord,
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExchangeCoordinator {
    store: Store,
    faults: FaultPlan,
}

impl ExchangeCoordinator {
    pub fn new(store: Store) -> Self {
        Self::with_faults(store, FaultPlan::disabled())
    }

    pub fn with_faults(store: Store, faults: FaultPlan) -> Self {
        Self { store, faults }
    }

    pub fn exchange(&self, params: &ExchangeParams) -> EngineResult<ExchangeResult> {
        self.exchange_with_cancel(params, &CancelToken::new())
    }

    pub fn exchange_with_cancel(
        &self,
        params: &ExchangeParams,
        cancel: &CancelToken,
    ) -> EngineResult<ExchangeResult> {
        params.validate()?;

        let span = tracing::info_span!(
            "exchange",
            from = params.from_account_id,
            to = params.to_account_id,
            item_1 = params.item_id_1,
            item_2 = params.item_id_2
        );
        let _enter = span.enter();

        let result = self.store.exec_tx(cancel, |tx| {
            let from = params.from_account_id;
            let to = params.to_account_id;

            validation::require_account(tx, from)?;
            validation::require_account(tx, to)?;
            validation::require_item(tx, params.item_id_1)?;
            validation::require_item(tx, params.item_id_2)?;

            // Checked under the write lock, so nothing can move these rows
            // between here and the updates below
            let offered = validation::require_ownership(tx, from, params.item_id_1)?;
            let wanted = validation::require_ownership(tx, to, params.item_id_2)?;

            let now = Utc::now();

            self.faults.trip(ExchangeStep::RecordForward)?;
            let exchange_1 = db::insert_exchange_record(tx, from, to, params.item_id_1)?;
            cancel.check()?;

            self.faults.trip(ExchangeStep::RecordReverse)?;
            let exchange_2 = db::insert_exchange_record(tx, to, from, params.item_id_2)?;
            cancel.check()?;

            self.faults.trip(ExchangeStep::MoveFirst)?;
            let gallery_1 = db::reassign_ownership(tx, offered.id, from, to, now)?.ok_or(
                EngineError::OwnershipMismatch {
                    account_id: from,
                    item_id: params.item_id_1,
                },
            )?;
            cancel.check()?;

            self.faults.trip(ExchangeStep::MoveSecond)?;
            let gallery_2 = db::reassign_ownership(tx, wanted.id, to, from, now)?.ok_or(
                EngineError::OwnershipMismatch {
                    account_id: to,
                    item_id: params.item_id_2,
                },
            )?;

            db::insert_event(
                tx,
                &Event::new(
                    "items_exchanged",
                    "exchange",
                    &exchange_1.id.to_string(),
                    serde_json::json!({
                        "exchange_ids": [exchange_1.id, exchange_2.id],
                        "gallery_ids": [gallery_1.id, gallery_2.id],
                        "from_account_id": from,
                        "to_account_id": to,
                        "item_id_1": params.item_id_1,
                        "item_id_2": params.item_id_2,
                    }),
                    "exchange_coordinator",
                ),
            )?;

            Ok(ExchangeResult {
                exchange_1,
                exchange_2,
                gallery_1,
                gallery_2,
            })
        });

        match &result {
            Ok(outcome) => tracing::info!(
                exchange_1 = outcome.exchange_1.id,
                exchange_2 = outcome.exchange_2.id,
                "exchange committed"
            ),
            Err(err) => tracing::warn!(kind = err.kind(), error = %err, "exchange rejected"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Store,
        alice: i64,
        bob: i64,
        sword: i64,
        shield: i64,
    }

    /// alice owns a sword, bob owns a shield
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("exchange.db"), Duration::from_millis(100));
        store.init_schema().unwrap();

        let conn = store.connect().unwrap();
        let alice = db::create_account(&conn, "alice", 0).unwrap().id;
        let bob = db::create_account(&conn, "bob", 0).unwrap().id;
        let category = db::create_category(&conn, "gear").unwrap();
        let sword = db::create_item(&conn, "sword", 4, "http://srrrs/sword", category.id)
            .unwrap()
            .id;
        let shield = db::create_item(&conn, "shield", 2, "http://srrrs/shield", category.id)
            .unwrap()
            .id;
        db::insert_ownership_record(&conn, alice, sword).unwrap();
        db::insert_ownership_record(&conn, bob, shield).unwrap();

        Fixture {
            _dir: dir,
            store,
            alice,
            bob,
            sword,
            shield,
        }
    }

    fn owners_of(store: &Store, item_id: i64) -> Vec<i64> {
        let conn = store.connect().unwrap();
        let mut stmt = conn
            .prepare("SELECT owner_id FROM galleries WHERE item_id = ?1 ORDER BY id")
            .unwrap();
        stmt.query_map([item_id], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<i64>, _>>()
            .unwrap()
    }

    fn exchange_count(store: &Store) -> i64 {
        let conn = store.connect().unwrap();
        db::count_exchanges(&conn).unwrap()
    }

    #[test]
    fn test_swap_moves_both_items() {
        let f = fixture();
        let coordinator = ExchangeCoordinator::new(f.store.clone());

        let result = coordinator
            .exchange(&ExchangeParams::new(f.alice, f.bob, f.sword, f.shield))
            .unwrap();

        assert_eq!(result.exchange_1.from_account_id, f.alice);
        assert_eq!(result.exchange_1.to_account_id, f.bob);
        assert_eq!(result.exchange_1.item_id, f.sword);
        assert_eq!(result.exchange_2.from_account_id, f.bob);
        assert_eq!(result.exchange_2.to_account_id, f.alice);
        assert_eq!(result.exchange_2.item_id, f.shield);

        assert_eq!(result.gallery_1.owner_id, f.bob);
        assert_eq!(result.gallery_2.owner_id, f.alice);
        assert!(result.gallery_1.exchange_at.is_some());
        assert!(result.gallery_2.exchange_at.is_some());

        assert_eq!(owners_of(&f.store, f.sword), vec![f.bob]);
        assert_eq!(owners_of(&f.store, f.shield), vec![f.alice]);
        assert_eq!(exchange_count(&f.store), 2);
    }

    #[test]
    fn test_ownership_mismatch_writes_nothing() {
        let f = fixture();
        let coordinator = ExchangeCoordinator::new(f.store.clone());

        // alice offers the shield she does not own
        let err = coordinator
            .exchange(&ExchangeParams::new(f.alice, f.bob, f.shield, f.shield))
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::OwnershipMismatch { account_id, item_id }
                if account_id == f.alice && item_id == f.shield
        ));
        assert_eq!(exchange_count(&f.store), 0);
        assert_eq!(owners_of(&f.store, f.sword), vec![f.alice]);
        assert_eq!(owners_of(&f.store, f.shield), vec![f.bob]);
    }

    #[test]
    fn test_counterparty_must_own_wanted_item() {
        let f = fixture();
        let coordinator = ExchangeCoordinator::new(f.store.clone());

        let err = coordinator
            .exchange(&ExchangeParams::new(f.alice, f.bob, f.sword, f.sword))
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::OwnershipMismatch { account_id, .. } if account_id == f.bob
        ));
        assert_eq!(exchange_count(&f.store), 0);
    }

    #[test]
    fn test_fault_at_any_later_step_rolls_back() {
        for step in [
            ExchangeStep::RecordReverse,
            ExchangeStep::MoveFirst,
            ExchangeStep::MoveSecond,
        ] {
            let f = fixture();
            let coordinator =
                ExchangeCoordinator::with_faults(f.store.clone(), FaultPlan::fail_at(step));

            let params = ExchangeParams::new(f.alice, f.bob, f.sword, f.shield);
            let result = coordinator.exchange(&params);

            assert!(matches!(result, Err(EngineError::Storage(_))), "step {:?}", step);
            assert_eq!(exchange_count(&f.store), 0, "step {:?}", step);
            assert_eq!(owners_of(&f.store, f.sword), vec![f.alice], "step {:?}", step);
            assert_eq!(owners_of(&f.store, f.shield), vec![f.bob], "step {:?}", step);
        }
    }

    #[test]
    fn test_missing_entities() {
        let f = fixture();
        let coordinator = ExchangeCoordinator::new(f.store.clone());

        assert!(matches!(
            coordinator.exchange(&ExchangeParams::new(f.alice, 404, f.sword, f.shield)),
            Err(EngineError::AccountNotFound(404))
        ));
        assert!(matches!(
            coordinator.exchange(&ExchangeParams::new(f.alice, f.bob, f.sword, 505)),
            Err(EngineError::ItemNotFound(505))
        ));
        assert_eq!(exchange_count(&f.store), 0);
    }

    #[test]
    fn test_validation_happens_before_transaction() {
        let f = fixture();
        let coordinator = ExchangeCoordinator::new(f.store.clone());

        for params in [
            ExchangeParams::new(0, f.bob, f.sword, f.shield),
            ExchangeParams::new(f.alice, -1, f.sword, f.shield),
            ExchangeParams::new(f.alice, f.bob, 0, f.shield),
            ExchangeParams::new(f.alice, f.bob, f.sword, 0),
            ExchangeParams::new(f.alice, f.alice, f.sword, f.sword),
        ] {
            assert!(matches!(
                coordinator.exchange(&params),
                Err(EngineError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_only_one_copy_moves() {
        let f = fixture();
        {
            let conn = f.store.connect().unwrap();
            db::insert_ownership_record(&conn, f.alice, f.sword).unwrap();
        }
        let coordinator = ExchangeCoordinator::new(f.store.clone());

        coordinator
            .exchange(&ExchangeParams::new(f.alice, f.bob, f.sword, f.shield))
            .unwrap();

        // Oldest copy moved, second copy stays with alice
        assert_eq!(owners_of(&f.store, f.sword), vec![f.bob, f.alice]);
    }

    #[test]
    fn test_exchange_is_audited() {
        let f = fixture();
        let coordinator = ExchangeCoordinator::new(f.store.clone());
        let result = coordinator
            .exchange(&ExchangeParams::new(f.alice, f.bob, f.sword, f.shield))
            .unwrap();

        let conn = f.store.connect().unwrap();
        let exchange_id = result.exchange_1.id.to_string();
        let events = db::get_events_for_entity(&conn, "exchange", &exchange_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "items_exchanged");
        assert_eq!(events[0].data["from_account_id"], f.alice);
    }
}
