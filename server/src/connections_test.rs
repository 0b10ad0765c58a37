use super::*;
use tokio::time::timeout;

#[test]
fn guards_track_live_count() {
    let connections = Connections::new();
    assert_eq!(connections.live(), 0);
    let a = connections.open();
    let b = connections.clone().open();
    assert_eq!(connections.live(), 2);
    drop(a);
    assert_eq!(connections.live(), 1);
    drop(b);
    assert_eq!(connections.live(), 0);
}

#[tokio::test]
async fn idle_resolves_when_nothing_ever_connects() {
    let connections = Connections::new();
    timeout(Duration::from_secs(2), connections.idle_for(Duration::from_millis(20)))
        .await
        .expect("idle shutdown should fire");
}

#[tokio::test]
async fn live_connection_holds_off_idle() {
    let connections = Connections::new();
    let guard = connections.open();
    let held = timeout(Duration::from_millis(100), connections.idle_for(Duration::from_millis(10))).await;
    assert!(held.is_err(), "idle fired with a live connection");
    drop(guard);
}

#[tokio::test]
async fn countdown_restarts_after_last_connection_closes() {
    let connections = Connections::new();
    let guard = connections.open();
    let waiter = {
        let connections = connections.clone();
        tokio::spawn(async move { connections.idle_for(Duration::from_millis(30)).await })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    timeout(Duration::from_secs(2), waiter)
        .await
        .expect("idle shutdown should fire after close")
        .expect("idle task should not panic");
}

#[tokio::test]
async fn new_connection_cancels_pending_countdown() {
    let connections = Connections::new();
    let waiter = {
        let connections = connections.clone();
        tokio::spawn(async move { connections.idle_for(Duration::from_millis(200)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let guard = connections.open();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!waiter.is_finished(), "countdown should have been cancelled");
    drop(guard);
    timeout(Duration::from_secs(2), waiter).await.expect("fires after close").expect("no panic");
}
