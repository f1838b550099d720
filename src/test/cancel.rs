use crate::sim::{EventId, SimTime, Simulator};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(sim: &mut Simulator, delay: SimTime, label: &'static str, log: &Log) -> EventId {
    let log = Arc::clone(log);
    sim.schedule_fn(delay, move |_cx, _sim, _world| {
        log.lock().expect("log lock").push(label);
        Ok(())
    })
    .unwrap()
}

fn logged(log: &Log) -> Vec<&'static str> {
    log.lock().expect("log lock").clone()
}

#[test]
fn cancel_immediately_after_scheduling_prevents_execution() {
    let log = Log::default();

    let mut sim = Simulator::default();
    let id = record(&mut sim, SimTime::from_secs(1), "a", &log);
    record(&mut sim, SimTime::from_secs(2), "b", &log);

    sim.cancel(id);
    assert!(sim.is_expired(id));
    assert_eq!(sim.pending_events(), 1);

    sim.run(&mut ()).unwrap();
    assert_eq!(logged(&log), ["b"]);
    assert_eq!(sim.event_count(), 1);
}

#[test]
fn cancel_after_fire_is_a_noop() {
    let log = Log::default();

    let mut sim = Simulator::default();
    let id = record(&mut sim, SimTime::from_secs(1), "a", &log);
    sim.run(&mut ()).unwrap();
    assert!(sim.is_expired(id));

    sim.cancel(id);
    sim.cancel(id);
    assert!(sim.is_expired(id));
    assert_eq!(logged(&log), ["a"]);
}

#[test]
fn cancelling_null_and_unknown_handles_is_safe() {
    let log = Log::default();

    let mut sim = Simulator::default();
    record(&mut sim, SimTime::from_secs(1), "a", &log);

    let null = EventId::default();
    assert!(null.is_null());
    assert!(sim.is_expired(null));
    sim.cancel(null);

    let mut other = Simulator::default();
    for _ in 0..5 {
        record(&mut other, SimTime::ZERO, "other", &log);
    }
    let foreign = record(&mut other, SimTime::ZERO, "other", &log);
    assert!(sim.is_expired(foreign));
    sim.cancel(foreign);

    sim.run(&mut ()).unwrap();
    assert_eq!(logged(&log), ["a"]);
}

#[test]
fn cancel_from_an_earlier_event_at_the_same_time() {
    let log = Log::default();

    let mut sim = Simulator::default();
    let victim = Arc::new(Mutex::new(EventId::default()));

    let v = Arc::clone(&victim);
    let l = Arc::clone(&log);
    sim.schedule_fn(SimTime::from_secs(1), move |_cx, sim, _world| {
        l.lock().expect("log lock").push("canceller");
        sim.cancel(*v.lock().expect("lock"));
        Ok(())
    })
    .unwrap();
    let id = record(&mut sim, SimTime::from_secs(1), "victim", &log);
    *victim.lock().expect("lock") = id;
    record(&mut sim, SimTime::from_secs(1), "survivor", &log);

    sim.run(&mut ()).unwrap();
    assert_eq!(logged(&log), ["canceller", "survivor"]);
    assert!(sim.is_expired(id));
}

#[test]
fn delay_left_reports_remaining_logical_time() {
    let log = Log::default();

    let mut sim = Simulator::default();
    let late = record(&mut sim, SimTime::from_secs(5), "late", &log);
    let early = record(&mut sim, SimTime::from_secs(2), "early", &log);

    assert_eq!(sim.delay_left(late), SimTime::from_secs(5));
    assert_eq!(late.at(), SimTime::from_secs(5));

    sim.run_until(SimTime::from_secs(3), &mut ()).unwrap();
    assert_eq!(sim.delay_left(late), SimTime::from_secs(2));
    assert_eq!(sim.delay_left(early), SimTime::ZERO);

    sim.cancel(late);
    assert_eq!(sim.delay_left(late), SimTime::ZERO);
}

#[test]
fn event_ids_are_unique_per_simulator() {
    let log = Log::default();

    let mut sim = Simulator::default();
    let a = record(&mut sim, SimTime::ZERO, "a", &log);
    let b = record(&mut sim, SimTime::ZERO, "b", &log);
    assert_ne!(a, b);
    assert!(a.uid() < b.uid());
}

#[test]
fn handle_from_another_simulator_is_ignored() {
    let log = Log::default();

    let mut a = Simulator::default();
    let mut b = Simulator::default();
    let a_id = record(&mut a, SimTime::from_secs(1), "a", &log);
    let b_id = record(&mut b, SimTime::from_secs(1), "b", &log);
    // 两个调度器各自从 1 开始编号
    assert_eq!(a_id.uid(), b_id.uid());
    assert_ne!(a_id, b_id);

    assert!(b.is_expired(a_id));
    assert_eq!(b.delay_left(a_id), SimTime::ZERO);
    b.cancel(a_id);
    assert!(!b.is_expired(b_id));
    assert_eq!(b.delay_left(b_id), SimTime::from_secs(1));

    b.run(&mut ()).unwrap();
    a.run(&mut ()).unwrap();
    assert_eq!(logged(&log), ["b", "a"]);
}

#[test]
fn heavy_cancel_and_reschedule_keeps_order_and_counts() {
    let log = Log::default();

    let mut sim = Simulator::default();
    let mut timer = record(&mut sim, SimTime::from_secs(100), "timer", &log);
    for _ in 0..200 {
        sim.cancel(timer);
        timer = record(&mut sim, SimTime::from_secs(100), "timer", &log);
    }
    record(&mut sim, SimTime::from_secs(1), "early", &log);
    assert_eq!(sim.pending_events(), 2);
    assert_eq!(sim.next_event_time(), Some(SimTime::from_secs(1)));

    sim.run(&mut ()).unwrap();
    assert_eq!(logged(&log), ["early", "timer"]);
    assert_eq!(sim.event_count(), 2);
    assert!(sim.is_expired(timer));
}
