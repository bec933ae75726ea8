use super::*;

#[tokio::test(start_paused = true)]
async fn test_checks_at_interval_until_deadline() {
    let start = Instant::now();
    let mut poller = Poller::new(
        Duration::from_secs(5),
        Duration::from_secs(12),
        CancellationToken::new(),
    );

    let mut checks = Vec::new();
    loop {
        match poller.tick().await {
            PollTick::Check => checks.push(start.elapsed().as_secs()),
            PollTick::Expired => break,
            PollTick::Cancelled => panic!("not cancelled"),
        }
    }

    assert_eq!(checks, vec![0, 5, 10]);
    assert_eq!(start.elapsed(), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_expire_now_ends_without_waiting() {
    let start = Instant::now();
    let mut poller = Poller::new(
        Duration::from_secs(5),
        Duration::from_secs(600),
        CancellationToken::new(),
    );
    assert_eq!(poller.tick().await, PollTick::Check);

    poller.expire_now();
    assert_eq!(poller.tick().await, PollTick::Expired);
    assert_eq!(poller.remaining(), Duration::ZERO);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_wait() {
    let token = CancellationToken::new();
    let mut poller = Poller::new(Duration::from_secs(5), Duration::from_secs(600), token.clone());
    assert_eq!(poller.tick().await, PollTick::Check);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
    });

    let start = Instant::now();
    assert_eq!(poller.tick().await, PollTick::Cancelled);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    canceller.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_budget_expires_immediately() {
    let mut poller = Poller::new(Duration::from_secs(5), Duration::ZERO, CancellationToken::new());
    assert_eq!(poller.tick().await, PollTick::Expired);
}

#[tokio::test(start_paused = true)]
async fn test_tick_is_pending_until_interval_passes() {
    let mut poller = Poller::new(Duration::from_secs(5), Duration::from_secs(60), CancellationToken::new());
    assert_eq!(poller.tick().await, PollTick::Check);

    let mut tick = tokio_test::task::spawn(poller.tick());
    tokio_test::assert_pending!(tick.poll());

    tokio::time::advance(Duration::from_secs(4)).await;
    tokio_test::assert_pending!(tick.poll());

    tokio::time::advance(Duration::from_secs(1)).await;
    tokio_test::assert_ready_eq!(tick.poll(), PollTick::Check);
}
