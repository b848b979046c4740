//! Outstanding-request ledger: satisfaction, ordering and retirement.

use std::time::Duration;

use ndntraffic::ledger::Ledger;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn every_request_is_satisfied_at_most_once() {
    let mut ledger = Ledger::new();
    for seq in 0..100 {
        ledger.record_sent(seq, ms(seq as u64));
    }
    for seq in 0..100 {
        let s = ledger
            .record_satisfied(seq, ms(seq as u64 + 40))
            .expect("first satisfaction");
        assert_eq!(s.last_delay, Some(ms(40)));
        assert!(ledger.record_satisfied(seq, ms(seq as u64 + 41)).is_none());
    }
    assert!(ledger.is_empty());
}

#[test]
fn satisfied_id_can_be_sent_again_as_a_fresh_request() {
    let mut ledger = Ledger::new();
    ledger.record_sent(9, ms(0));
    ledger.record_satisfied(9, ms(10)).unwrap();

    ledger.record_sent(9, ms(500));
    let s = ledger.record_satisfied(9, ms(520)).unwrap();
    assert_eq!(s.retransmit_count, 1);
    assert_eq!(s.total_delay, Some(ms(20)));
}

#[test]
fn retired_request_reports_total_delay_across_retransmissions() {
    let mut ledger = Ledger::new();
    ledger.record_sent(1, ms(0));
    assert!(ledger.retire(1));
    assert!(!ledger.is_outstanding(1));
    assert!(ledger.contains(1));

    ledger.record_sent(1, ms(300));
    ledger.record_sent(2, ms(310));
    assert_eq!(ledger.earliest_pending(), Some((1, ms(300))));

    let s = ledger.record_satisfied(1, ms(350)).unwrap();
    assert_eq!(s.last_delay, Some(ms(50)));
    assert_eq!(s.total_delay, Some(ms(350)));
    assert_eq!(s.retransmit_count, 2);
    assert_eq!(ledger.earliest_pending(), Some((2, ms(310))));
}

#[test]
fn late_response_after_retirement_is_still_satisfied() {
    let mut ledger = Ledger::new();
    ledger.record_sent(4, ms(0));
    ledger.retire(4);
    let s = ledger.record_satisfied(4, ms(1500)).unwrap();
    assert_eq!(s.total_delay, Some(ms(1500)));
    assert!(ledger.is_empty());
}

#[test]
fn equal_send_times_pop_in_insertion_order() {
    let mut ledger = Ledger::new();
    for seq in [30, 10, 20] {
        ledger.record_sent(seq, ms(5));
    }
    let mut order = Vec::new();
    while let Some((seq, _)) = ledger.earliest_pending() {
        ledger.retire(seq);
        order.push(seq);
    }
    assert_eq!(order, vec![30, 10, 20]);
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn clear_drops_everything() {
    let mut ledger = Ledger::new();
    ledger.record_sent(1, ms(0));
    ledger.record_sent(2, ms(1));
    ledger.retire(2);
    ledger.clear();
    assert!(ledger.is_empty());
    assert!(ledger.earliest_pending().is_none());
    assert!(ledger.record_satisfied(1, ms(5)).is_none());
}
