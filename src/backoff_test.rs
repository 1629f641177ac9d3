use super::*;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn delays_double_until_capped() {
    let mut backoff = Backoff::new(secs(1), secs(10), 0.0);
    let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
    assert_eq!(delays, vec![secs(1), secs(2), secs(4), secs(8), secs(10), secs(10)]);
    assert_eq!(backoff.failures(), 6);
}

#[test]
fn reset_restarts_from_base() {
    let mut backoff = Backoff::new(secs(1), secs(30), 0.0);
    let _ = backoff.next_delay();
    let _ = backoff.next_delay();
    backoff.reset();
    assert_eq!(backoff.next_delay(), secs(1));
}

#[test]
fn jitter_stays_within_ratio() {
    let mut backoff = Backoff::new(secs(2), secs(2), 0.5);
    for _ in 0..50 {
        let delay = backoff.next_delay();
        assert!(delay >= secs(2), "delay {delay:?} below base");
        assert!(delay <= secs(3), "delay {delay:?} above base plus jitter");
    }
}

#[test]
fn many_failures_do_not_overflow() {
    let mut backoff = Backoff::new(Duration::from_millis(500), secs(60), 0.0);
    for _ in 0..100 {
        let _ = backoff.next_delay();
    }
    assert_eq!(backoff.next_delay(), secs(60));
}

#[test]
fn max_below_base_is_raised_to_base() {
    let mut backoff = Backoff::new(secs(5), secs(1), 0.0);
    assert_eq!(backoff.next_delay(), secs(5));
    assert_eq!(backoff.next_delay(), secs(5));
}
