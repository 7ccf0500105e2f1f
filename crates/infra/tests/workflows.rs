mod common;

use rust_decimal_macros::dec;

use stockledger_auth::{Grant, Permission};
use stockledger_core::{DomainError, StockKey, UserId};
use stockledger_infra::TransferLineInput;
use stockledger_inventory::{
    AdjustmentStatus, AllocationPolicy, ApprovalLevel, CostingMethod, CountPass, InventoryStatus,
    InventoryType, MovementType, NewLot, ReservationStatus, TransferStatus,
};

use common::Harness;

#[test]
fn frozen_inventory_blocks_sales_until_closed() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(100), dec!(4));
    let validator = h.user_with(Permission::INVENTORY_VALIDATE);
    let counts = h.engine.inventories();

    let inv = counts.create(h.a.id, InventoryType::Full, true, h.clerk).unwrap();
    let id = inv.id_typed();
    counts.open(id, h.clerk).unwrap();

    let sale = h.request(MovementType::ExitSale, &x, &h.a, dec!(1));
    let err = h.engine.ledger().append(sale.clone()).unwrap_err();
    assert!(matches!(err, DomainError::MovementsFrozen { .. }));
    // Other depots keep moving.
    h.receive(&x, &h.b, dec!(1), dec!(4));

    counts.record_count(id, 1, UserId::new(), CountPass::First, dec!(97)).unwrap();
    let inv = counts.validate(id, validator).unwrap();
    let adj = inv.adjustments()[0].clone();
    assert_eq!(adj.approval_level, ApprovalLevel::Standard);
    assert_eq!(adj.approver, Some(validator));

    let inv = counts.apply_adjustment(id, adj.id, validator).unwrap();
    assert_eq!(inv.status(), InventoryStatus::Closed);
    assert!(inv.adjustments()[0].movement.is_some());

    let rec = h.engine.projection().get(&h.key(&x, &h.a)).unwrap();
    assert_eq!(rec.physical_qty, dec!(97));
    let adjustments: Vec<_> = h
        .engine
        .ledger()
        .by_article(x.id)
        .unwrap()
        .into_iter()
        .filter(|m| m.movement_type == MovementType::ExitAdjustment)
        .collect();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0].quantity, dec!(3));

    h.engine.ledger().append(sale).unwrap();
    assert!(!h.audit.for_entity("adjustment").is_empty());
}

#[test]
fn large_variance_needs_senior_approval() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(100), dec!(10));
    let validator = h.user_with(Permission::INVENTORY_VALIDATE);
    let senior = h.user_with(Permission::ADJUSTMENT_APPROVE_SENIOR);
    let counts = h.engine.inventories();

    let inv = counts.create(h.a.id, InventoryType::Partial(vec![x.id]), false, h.clerk).unwrap();
    let id = inv.id_typed();
    counts.open(id, h.clerk).unwrap();
    counts.record_count(id, 1, UserId::new(), CountPass::First, dec!(40)).unwrap();
    let inv = counts.validate(id, validator).unwrap();
    let adj = inv.adjustments()[0].clone();
    assert_eq!(adj.approval_level, ApprovalLevel::Senior);
    assert_eq!(adj.value, dec!(-600));

    assert!(counts.apply_adjustment(id, adj.id, validator).is_err());
    let err = counts.approve_adjustment(id, adj.id, validator).unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));

    counts.approve_adjustment(id, adj.id, senior).unwrap();
    let inv = counts.apply_ready(id, validator).unwrap();
    assert_eq!(inv.status(), InventoryStatus::Closed);
    assert_eq!(inv.adjustments()[0].status, AdjustmentStatus::Applied);
    assert_eq!(h.engine.projection().get(&h.key(&x, &h.a)).unwrap().physical_qty, dec!(40));
}

#[test]
fn waived_adjustment_posts_nothing() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(1));
    let validator = h.user_with(Permission::INVENTORY_VALIDATE);
    let counts = h.engine.inventories();

    let id = counts.create(h.a.id, InventoryType::Full, false, h.clerk).unwrap().id_typed();
    counts.open(id, h.clerk).unwrap();
    counts.record_count(id, 1, UserId::new(), CountPass::First, dec!(12)).unwrap();
    let adj = counts.validate(id, validator).unwrap().adjustments()[0].id;

    let inv = counts.waive_adjustment(id, adj, validator, "miscounted pallet").unwrap();
    assert_eq!(inv.status(), InventoryStatus::Closed);
    assert_eq!(h.engine.ledger().all().unwrap().len(), 1);
}

#[test]
fn cancelled_inventory_unfreezes_the_depot() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(1));
    let counts = h.engine.inventories();

    let id = counts.create(h.a.id, InventoryType::Full, true, h.clerk).unwrap().id_typed();
    counts.open(id, h.clerk).unwrap();
    assert!(h.engine.ledger().append(h.request(MovementType::ExitSale, &x, &h.a, dec!(1))).is_err());

    let inv = counts.cancel(id, h.clerk, "wrong depot").unwrap();
    assert_eq!(inv.status(), InventoryStatus::Cancelled);
    h.post(MovementType::ExitSale, &x, &h.a, dec!(1));
}

#[test]
fn second_freeze_on_a_depot_is_rejected() {
    let h = Harness::new();
    let counts = h.engine.inventories();
    let first = counts.create(h.a.id, InventoryType::Full, true, h.clerk).unwrap().id_typed();
    let second = counts.create(h.a.id, InventoryType::Full, true, h.clerk).unwrap().id_typed();

    counts.open(first, h.clerk).unwrap();
    assert!(counts.open(second, h.clerk).is_err());
    assert_eq!(counts.get(second).unwrap().status(), InventoryStatus::Draft);
}

#[test]
fn found_stock_can_be_added_during_counting() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    let y = h.article("Y", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(1));
    h.receive(&y, &h.b, dec!(1), dec!(2));
    let validator = h.user_with(Permission::INVENTORY_VALIDATE);
    let counts = h.engine.inventories();

    let id = counts.create(h.a.id, InventoryType::Full, false, h.clerk).unwrap().id_typed();
    counts.open(id, h.clerk).unwrap();
    let inv = counts.add_line(id, y.id, None, None, h.clerk).unwrap();
    assert_eq!(inv.lines().len(), 2);
    assert_eq!(inv.lines()[1].theoretical_qty, dec!(0));

    let counter = UserId::new();
    counts.record_count(id, 1, counter, CountPass::First, dec!(10)).unwrap();
    counts.record_count(id, 2, counter, CountPass::First, dec!(3)).unwrap();
    counts.validate(id, validator).unwrap();
    let inv = counts.apply_ready(id, validator).unwrap();
    assert_eq!(inv.status(), InventoryStatus::Closed);

    let found = h.engine.projection().get(&h.key(&y, &h.a)).unwrap();
    assert_eq!(found.physical_qty, dec!(3));
    assert_eq!(found.stock_value, dec!(6));
}

#[test]
fn validating_a_transfer_needs_the_permission() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(5));
    let capped = UserId::new();
    h.authz
        .grant(capped, Grant::new(Permission::TRANSFER_VALIDATE).up_to(dec!(20)));
    let transfers = h.engine.transfers();

    let id = transfers.create(h.a.id, h.b.id, h.clerk).unwrap().id_typed();
    transfers.add_line(id, TransferLineInput::new(x.id, dec!(5)), h.clerk).unwrap();
    transfers.request(id, h.clerk).unwrap();

    let err = transfers.validate(id, UserId::new()).unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));
    let err = transfers.validate(id, capped).unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));
    let err = transfers.validate(id, h.clerk).unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));
    assert_eq!(transfers.get(id).unwrap().status(), TransferStatus::Requested);
}

#[test]
fn failed_request_releases_earlier_lines() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    let y = h.article("Y", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(1));
    h.receive(&y, &h.a, dec!(2), dec!(1));
    let transfers = h.engine.transfers();

    let id = transfers.create(h.a.id, h.b.id, h.clerk).unwrap().id_typed();
    transfers.add_line(id, TransferLineInput::new(x.id, dec!(8)), h.clerk).unwrap();
    transfers.add_line(id, TransferLineInput::new(y.id, dec!(5)), h.clerk).unwrap();

    let err = transfers.request(id, h.clerk).unwrap_err();
    assert!(matches!(err, DomainError::InsufficientStock { .. }));
    assert_eq!(h.engine.projection().available(&h.key(&x, &h.a)).unwrap(), dec!(10));
    assert_eq!(transfers.get(id).unwrap().status(), TransferStatus::Draft);
}

#[test]
fn cancelled_transfer_releases_its_reservations() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(1));
    let transfers = h.engine.transfers();

    let id = transfers.create(h.a.id, h.b.id, h.clerk).unwrap().id_typed();
    transfers.add_line(id, TransferLineInput::new(x.id, dec!(6)), h.clerk).unwrap();
    let t = transfers.request(id, h.clerk).unwrap();
    let reservation = t.lines()[0].reservation.unwrap();

    let t = transfers.cancel(id, h.clerk, "customer changed plans").unwrap();
    assert_eq!(t.status(), TransferStatus::Cancelled);
    let r = h.engine.reservations().get(reservation).unwrap().unwrap();
    assert_eq!(r.status, ReservationStatus::Cancelled);
    assert_eq!(h.engine.projection().available(&h.key(&x, &h.a)).unwrap(), dec!(10));
}

#[test]
fn allocation_reserves_every_slice() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::Fifo);
    h.receive(&x, &h.a, dec!(5), dec!(1));
    let today = chrono::Utc::now().date_naive();

    let taken = h
        .engine
        .allocation()
        .reserve_plan(x.id, h.a.id, dec!(4), AllocationPolicy::Fifo, "SO-9", h.clerk, today)
        .unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(h.engine.projection().available(&h.key(&x, &h.a)).unwrap(), dec!(1));

    assert!(
        h.engine
            .allocation()
            .reserve_plan(x.id, h.a.id, dec!(4), AllocationPolicy::Fifo, "SO-10", h.clerk, today)
            .is_err()
    );
    assert_eq!(h.engine.projection().available(&h.key(&x, &h.a)).unwrap(), dec!(1));
}

#[test]
fn shipped_lot_can_be_received_after_it_was_blocked() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    let lot = h.engine.lots().register(NewLot::new("L1", x.id), h.clerk).unwrap();
    h.engine
        .ledger()
        .append(
            h.request(MovementType::EntryPurchase, &x, &h.a, dec!(10))
                .with_lot(Some(lot.id))
                .with_unit_cost(dec!(3)),
        )
        .unwrap();
    let approver = h.user_with(Permission::TRANSFER_VALIDATE);
    let transfers = h.engine.transfers();

    let id = transfers.create(h.a.id, h.b.id, h.clerk).unwrap().id_typed();
    transfers
        .add_line(id, TransferLineInput::new(x.id, dec!(10)).with_lot(Some(lot.id)), h.clerk)
        .unwrap();
    transfers.request(id, h.clerk).unwrap();
    transfers.validate(id, approver).unwrap();
    transfers.ship(id, 1, dec!(10), h.clerk).unwrap();

    h.engine.lots().block(lot.id, "recall", h.clerk).unwrap();
    let t = transfers.receive(id, 1, dec!(10), h.clerk).unwrap();

    assert_eq!(t.status(), TransferStatus::Received);
    let landed = StockKey::new(x.id, h.b.id, h.b.default_location, Some(lot.id));
    let rec = h.engine.projection().get(&landed).unwrap();
    assert_eq!(rec.physical_qty, dec!(10));
    assert_eq!(rec.stock_value, dec!(30));

    // Blocked stock still cannot be sold at the destination.
    let err = h
        .engine
        .ledger()
        .append(h.request(MovementType::ExitSale, &x, &h.b, dec!(1)).with_lot(Some(lot.id)))
        .unwrap_err();
    assert!(matches!(err, DomainError::LotUnavailable { .. }));
}

#[test]
fn transfer_ships_after_its_reservation_was_released() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    h.receive(&x, &h.a, dec!(10), dec!(2));
    let approver = h.user_with(Permission::TRANSFER_VALIDATE);
    let transfers = h.engine.transfers();

    let id = transfers.create(h.a.id, h.b.id, h.clerk).unwrap().id_typed();
    transfers.add_line(id, TransferLineInput::new(x.id, dec!(6)), h.clerk).unwrap();
    let t = transfers.request(id, h.clerk).unwrap();
    transfers.validate(id, approver).unwrap();
    let reservation = t.lines()[0].reservation.unwrap();
    assert!(h.engine.reservations().release(reservation, h.clerk).unwrap());

    let t = transfers.ship(id, 1, dec!(6), h.clerk).unwrap();
    assert_eq!(t.status(), TransferStatus::InTransit);
    let rec = h.engine.projection().get(&h.key(&x, &h.a)).unwrap();
    assert_eq!(rec.physical_qty, dec!(4));
    assert_eq!(rec.reserved_qty, dec!(0));
    assert_eq!(rec.available_qty, dec!(4));
    let r = h.engine.reservations().get(reservation).unwrap().unwrap();
    assert_eq!(r.status, ReservationStatus::Cancelled);
}
