//! Leader election tests against the in-memory lock service.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_consul::{
    InMemoryLockService, LeaderElection, LeaderElectionConfig, LeadershipStatus, SuspendableRoute,
};
use tokio::time::sleep;

struct TestRoute {
    id: String,
    suspended: AtomicBool,
    suspend_count: AtomicU64,
    resume_count: AtomicU64,
}

impl TestRoute {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            suspended: AtomicBool::new(false),
            suspend_count: AtomicU64::new(0),
            resume_count: AtomicU64::new(0),
        })
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn resumes(&self) -> u64 {
        self.resume_count.load(Ordering::SeqCst)
    }

    fn suspends(&self) -> u64 {
        self.suspend_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SuspendableRoute for TestRoute {
    fn id(&self) -> &str {
        &self.id
    }

    async fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        self.suspend_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.resume_count.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_config(service: &str) -> LeaderElectionConfig {
    // ttl/3 gives a ~50ms observation cycle.
    LeaderElectionConfig::new(service).with_ttl(Duration::from_millis(150))
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn election_gates_managed_routes() {
    let service = InMemoryLockService::new();
    let election = LeaderElection::new(service.clone(), fast_config("orders"));

    let route = TestRoute::new("orders-intake");
    election.manage_route(route.clone()).await;

    // Managed while not leader: suspended immediately.
    assert!(route.is_suspended());
    assert_eq!(route.suspends(), 1);

    let handle = election.clone().start().unwrap();
    eventually("leadership acquired", || election.is_leader()).await;
    eventually("route resumed", || !route.is_suspended()).await;
    assert_eq!(election.status(), LeadershipStatus::Leader);
    assert_eq!(route.resumes(), 1);

    // The lease holds across renewal cycles.
    sleep(Duration::from_millis(200)).await;
    assert!(election.is_leader());
    assert_eq!(route.resumes(), 1);

    election.stop().await;
    handle.await.unwrap();
}

#[tokio::test]
async fn renewal_failure_demotes_and_suspends() {
    let service = InMemoryLockService::new();
    let election = LeaderElection::new(service.clone(), fast_config("billing"));

    let route = TestRoute::new("billing-sync");
    election.manage_route(route.clone()).await;

    let handle = election.clone().start().unwrap();
    eventually("leadership acquired", || election.is_leader()).await;

    let session = service
        .holder("service/billing/leader")
        .expect("leader holds the key");
    service.fail_renewals_for(&session);

    eventually("leadership lost", || !election.is_leader()).await;
    eventually("route suspended again", || route.is_suspended()).await;
    assert_eq!(election.status(), LeadershipStatus::Follower);

    // Free the stale lock; the election recovers with a fresh session.
    service.expire_session(&session);
    eventually("leadership reacquired", || election.is_leader()).await;
    eventually("route resumed again", || !route.is_suspended()).await;
    assert!(route.resumes() >= 2);

    election.stop().await;
    handle.await.unwrap();
}

#[tokio::test]
async fn competing_elections_are_mutually_exclusive() {
    let service = InMemoryLockService::new();
    let first = LeaderElection::new(service.clone(), fast_config("payments"));
    let second = LeaderElection::new(service.clone(), fast_config("payments"));

    let first_handle = first.clone().start().unwrap();
    let second_handle = second.clone().start().unwrap();

    eventually("one election wins", || {
        first.is_leader() || second.is_leader()
    })
    .await;

    // Sample across several observation cycles: never two leaders.
    for _ in 0..40 {
        assert!(
            !(first.is_leader() && second.is_leader()),
            "both elections claim leadership"
        );
        sleep(Duration::from_millis(10)).await;
    }

    // Fail over: expire the current leader's session.
    let (leader, follower) = if first.is_leader() {
        (&first, &second)
    } else {
        (&second, &first)
    };
    let session = service
        .holder("service/payments/leader")
        .expect("a leader holds the key");
    service.expire_session(&session);

    eventually("follower takes over", || follower.is_leader()).await;
    eventually("old leader stands down", || !leader.is_leader()).await;

    for _ in 0..40 {
        assert!(
            !(first.is_leader() && second.is_leader()),
            "both elections claim leadership after failover"
        );
        sleep(Duration::from_millis(10)).await;
    }

    first.stop().await;
    second.stop().await;
    first_handle.await.unwrap();
    second_handle.await.unwrap();
}
