mod common;

use std::collections::HashMap;
use std::thread;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use stockledger_core::DomainError;
use stockledger_infra::ReserveRequest;
use stockledger_inventory::{CostingMethod, MovementType};

use common::Harness;

const ROUNDS: usize = 40;

#[test]
fn racing_reservations_and_sales_keep_one_key_consistent() {
    let h = Harness::new();
    let x = h.article("X", CostingMethod::WeightedAverage);
    let y = h.article("Y", CostingMethod::Fifo);
    h.receive(&x, &h.a, dec!(300), dec!(2));
    let key = h.key(&x, &h.a);

    let sold: Decimal = thread::scope(|s| {
        let (h, x, y) = (&h, &x, &y);
        let mut workers = Vec::new();

        // Reserve 2, then either sell against the reservation or drop it.
        for t in 0..4 {
            workers.push(s.spawn(move || {
                let mut sold = Decimal::ZERO;
                for i in 0..ROUNDS {
                    let req = ReserveRequest::new(x.id, h.a.id, dec!(2), format!("SO-{t}-{i}"));
                    let r = match h.engine.reservations().reserve(req, h.clerk) {
                        Ok(r) => r,
                        Err(DomainError::InsufficientStock { .. }) => continue,
                        Err(err) => panic!("unexpected reserve error: {err}"),
                    };
                    if i % 2 == 0 {
                        h.engine
                            .ledger()
                            .append(h.request(MovementType::ExitSale, x, &h.a, dec!(2)).consuming(r.id))
                            .unwrap();
                        sold += dec!(2);
                    } else {
                        h.engine.reservations().release(r.id, h.clerk).unwrap();
                    }
                }
                sold
            }));
        }

        // Plain sales from unreserved stock.
        for _ in 0..4 {
            workers.push(s.spawn(move || {
                let mut sold = Decimal::ZERO;
                for _ in 0..ROUNDS {
                    match h.engine.ledger().append(h.request(MovementType::ExitSale, x, &h.a, dec!(3))) {
                        Ok(out) => sold += out.quantity(),
                        Err(DomainError::InsufficientStock { .. }) => {}
                        Err(err) => panic!("unexpected sale error: {err}"),
                    }
                }
                sold
            }));
        }

        // A disjoint key, written at the same time.
        workers.push(s.spawn(move || {
            for _ in 0..ROUNDS {
                h.receive(y, &h.b, dec!(1), dec!(1));
            }
            Decimal::ZERO
        }));

        // Every observed record satisfies the availability identity.
        workers.push(s.spawn(move || {
            for _ in 0..ROUNDS * 4 {
                let rec = h.engine.projection().get(&key).unwrap();
                assert_eq!(rec.available_qty, rec.physical_qty - rec.reserved_qty);
                assert!(rec.available_qty >= Decimal::ZERO);
                thread::yield_now();
            }
            Decimal::ZERO
        }));

        workers.into_iter().map(|w| w.join().unwrap()).sum()
    });

    let rec = h.engine.projection().get(&key).unwrap();
    assert_eq!(rec.physical_qty, dec!(300) - sold);
    assert_eq!(rec.available_qty, rec.physical_qty - rec.reserved_qty);
    assert!(rec.available_qty >= Decimal::ZERO);
    let held: Decimal = h
        .engine
        .reservations()
        .active_at(&key)
        .unwrap()
        .iter()
        .map(|r| r.quantity)
        .sum();
    assert_eq!(rec.reserved_qty, held);

    let other = h.engine.projection().get(&h.key(&y, &h.b)).unwrap();
    assert_eq!(other.physical_qty, Decimal::from(ROUNDS));
    assert!(h.engine.ledger().reconcile().unwrap().is_empty());
}

#[test]
fn concurrent_appends_number_in_ledger_order() {
    let h = Harness::new();
    let articles: Vec<_> = (0..4)
        .map(|i| h.article(&format!("A{i}"), CostingMethod::Fifo))
        .collect();

    thread::scope(|s| {
        for article in &articles {
            let h = &h;
            s.spawn(move || {
                for i in 0..ROUNDS {
                    h.receive(article, &h.a, dec!(2), Decimal::from(i + 1));
                    if i % 2 == 1 {
                        h.post(MovementType::ExitSale, article, &h.a, dec!(1));
                    }
                }
            });
        }
    });

    let movements = h.engine.ledger().all().unwrap();
    let mut last: HashMap<String, String> = HashMap::new();
    let mut last_seq = 0;
    for m in &movements {
        assert!(m.seq > last_seq, "seq {} after {last_seq}", m.seq);
        last_seq = m.seq;
        let prefix = m.number.prefix().to_string();
        if let Some(prev) = last.get(&prefix) {
            assert!(m.number.as_str() > prev.as_str(), "{} after {prev}", m.number);
        }
        last.insert(prefix, m.number.as_str().to_string());
    }

    for article in &articles {
        let rec = h.engine.projection().get(&h.key(article, &h.a)).unwrap();
        assert_eq!(rec.physical_qty, dec!(60));
    }
    assert!(h.engine.ledger().reconcile().unwrap().is_empty());
}
