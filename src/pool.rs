// IPFS Kit Core - Connection Pool
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Bounded set of lazily-created clients to one endpoint.
//   - get_connection: idle entry, else grow (< max), else share the LRU entry
//   - idle entries past ttl are evicted before any entry is handed out
//   - health check runs opportunistically, throttled by health_check_interval;
//     probes happen outside the pool lock
// Initialization failures follow InitFailurePolicy: Fail returns an error,
// Degrade hands out an entry with no client that callers can detect.

use crate::config::{EndpointConfig, InitFailurePolicy, PoolSettings};
use crate::error::PoolError;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Creates and probes clients for the pool
pub trait Connector: Send + Sync {
    type Client: Clone + Send + Sync;

    fn connect(&self, endpoint: &EndpointConfig) -> Result<Self::Client, PoolError>;

    /// Liveness probe; false marks the entry for re-initialization
    fn probe(&self, client: &Self::Client) -> bool;
}

/// Decides whether an error from a leased client counts against the entry.
/// Errors the endpoint reports about the request itself do not.
pub trait ConnectionFault {
    fn is_connection_fault(&self) -> bool;
}

impl ConnectionFault for PoolError {
    fn is_connection_fault(&self) -> bool {
        true
    }
}

struct PoolEntry<T> {
    id: u64,
    config: EndpointConfig,
    /// None for a degraded entry
    client: Option<T>,
    last_used: Instant,
    /// Outstanding handles; in use when > 0
    leases: usize,
    error_count: u32,
}

impl<T> PoolEntry<T> {
    fn in_use(&self) -> bool {
        self.leases > 0
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolCounters {
    pub created: u64,
    pub reused: u64,
    /// Handed out while already leased (pool saturated)
    pub shared: u64,
    pub evicted_idle: u64,
    pub dropped_errors: u64,
    pub reinitialized: u64,
    pub init_failures: u64,
    pub health_checks: u64,
}

struct PoolState<T> {
    entries: Vec<PoolEntry<T>>,
    next_id: u64,
    last_health_check: Instant,
    counters: PoolCounters,
}

/// A leased client. Return it with release_connection().
#[derive(Debug)]
pub struct PooledConnection<T> {
    entry_id: u64,
    client: Option<T>,
}

impl<T> PooledConnection<T> {
    /// None when the entry is degraded
    pub fn client(&self) -> Option<&T> {
        self.client.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.client.is_none()
    }

    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }
}

/// Idle entry leased to the health checker
struct ProbeTarget<T> {
    id: u64,
    config: EndpointConfig,
    client: Option<T>,
}

struct HealthBatch<T> {
    evicted: usize,
    targets: Vec<ProbeTarget<T>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HealthReport {
    pub checked: usize,
    pub evicted: usize,
    pub reinitialized: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub endpoint: String,
    pub max_connections: usize,
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub degraded: usize,
    pub error_counts: Vec<u32>,
    pub counters: PoolCounters,
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    endpoint: EndpointConfig,
    settings: PoolSettings,
    state: Mutex<PoolState<C::Client>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, endpoint: EndpointConfig, settings: PoolSettings) -> Result<Self, PoolError> {
        if settings.max_connections == 0 {
            return Err(PoolError::InvalidConfig("max_connections must be > 0".to_string()));
        }
        if settings.max_errors == 0 {
            return Err(PoolError::InvalidConfig("max_errors must be > 0".to_string()));
        }
        log::info!(
            "Connection pool for {} (max {}, ttl {}s, policy {:?})",
            endpoint.api_url, settings.max_connections, settings.ttl_secs, settings.on_init_failure
        );
        Ok(Self {
            connector,
            endpoint,
            settings,
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                next_id: 1,
                last_health_check: Instant::now(),
                counters: PoolCounters::default(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState<C::Client>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Lease a client
    pub fn get_connection(&self) -> Result<PooledConnection<C::Client>, PoolError> {
        if let Some(batch) = self.claim_due_health_check() {
            self.complete_health_check(batch);
        }

        let mut state = self.lock();
        let now = Instant::now();
        self.evict_expired(&mut state, now);

        // Most recently used idle entry first
        if let Some(entry) = state
            .entries
            .iter_mut()
            .filter(|e| !e.in_use())
            .max_by_key(|e| e.last_used)
        {
            entry.leases += 1;
            entry.last_used = now;
            let conn = PooledConnection { entry_id: entry.id, client: entry.client.clone() };
            state.counters.reused += 1;
            return Ok(conn);
        }

        if state.entries.len() < self.settings.max_connections {
            let client = self.initialize(&mut state)?;
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push(PoolEntry {
                id,
                config: self.endpoint.clone(),
                client: client.clone(),
                last_used: now,
                leases: 1,
                error_count: 0,
            });
            state.counters.created += 1;
            log::debug!("pool: created entry {} ({} live)", id, state.entries.len());
            return Ok(PooledConnection { entry_id: id, client });
        }

        // Saturated: share the least recently used entry
        let entry = state
            .entries
            .iter_mut()
            .min_by_key(|e| e.last_used)
            .ok_or_else(|| PoolError::InvalidConfig("pool has no entries".to_string()))?;
        entry.leases += 1;
        entry.last_used = now;
        let conn = PooledConnection { entry_id: entry.id, client: entry.client.clone() };
        state.counters.shared += 1;
        log::debug!("pool: saturated, sharing entry {}", conn.entry_id);
        Ok(conn)
    }

    fn initialize(&self, state: &mut PoolState<C::Client>) -> Result<Option<C::Client>, PoolError> {
        match self.connector.connect(&self.endpoint) {
            Ok(client) => Ok(Some(client)),
            Err(e) => {
                state.counters.init_failures += 1;
                match self.settings.on_init_failure {
                    InitFailurePolicy::Fail => Err(e),
                    InitFailurePolicy::Degrade => {
                        log::warn!("pool: client init failed, handing out degraded entry: {}", e);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Return a leased client
    pub fn release_connection(&self, conn: PooledConnection<C::Client>) {
        self.release(conn, false);
    }

    /// Return a leased client that hit an error. The entry is dropped once
    /// it reaches max_errors.
    pub fn release_with_error(&self, conn: PooledConnection<C::Client>) {
        self.release(conn, true);
    }

    fn release(&self, conn: PooledConnection<C::Client>, failed: bool) {
        let mut state = self.lock();
        let now = Instant::now();
        let max_errors = self.settings.max_errors;

        let Some(pos) = state.entries.iter().position(|e| e.id == conn.entry_id) else {
            log::debug!("pool: released entry {} no longer tracked", conn.entry_id);
            return;
        };

        let entry = &mut state.entries[pos];
        entry.leases = entry.leases.saturating_sub(1);
        entry.last_used = now;
        if failed {
            entry.error_count += 1;
            if entry.error_count >= max_errors && !entry.in_use() {
                log::warn!("pool: dropping entry {} after {} errors", entry.id, entry.error_count);
                state.entries.remove(pos);
                state.counters.dropped_errors += 1;
            }
        }
    }

    /// Lease, run `f`, release. Only connection faults count against the entry.
    pub fn with_connection<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&PooledConnection<C::Client>) -> Result<R, E>,
        E: From<PoolError> + ConnectionFault,
    {
        let conn = self.get_connection()?;
        let result = f(&conn);
        match &result {
            Err(e) if e.is_connection_fault() => self.release_with_error(conn),
            _ => self.release_connection(conn),
        }
        result
    }

    fn evict_expired(&self, state: &mut PoolState<C::Client>, now: Instant) -> usize {
        let ttl = self.settings.ttl();
        let before = state.entries.len();
        state.entries.retain(|e| e.in_use() || e.idle_for(now) <= ttl);
        let evicted = before - state.entries.len();
        if evicted > 0 {
            state.counters.evicted_idle += evicted as u64;
            log::debug!("pool: evicted {} idle entries", evicted);
        }
        evicted
    }

    /// Drop idle entries past ttl, re-initialize idle entries that fail the
    /// probe or are degraded. Probes run without holding the pool lock.
    pub fn run_health_check(&self) -> HealthReport {
        let batch = {
            let mut state = self.lock();
            self.claim_for_health_check(&mut state, Instant::now())
        };
        self.complete_health_check(batch)
    }

    fn claim_due_health_check(&self) -> Option<HealthBatch<C::Client>> {
        let mut state = self.lock();
        let now = Instant::now();
        if now.saturating_duration_since(state.last_health_check) < self.settings.health_check_interval() {
            return None;
        }
        Some(self.claim_for_health_check(&mut state, now))
    }

    /// Evict expired entries and lease every idle one to the checker.
    /// Leased targets cannot be handed out or evicted while probed.
    fn claim_for_health_check(&self, state: &mut PoolState<C::Client>, now: Instant) -> HealthBatch<C::Client> {
        let evicted = self.evict_expired(state, now);
        state.last_health_check = now;
        let targets = state
            .entries
            .iter_mut()
            .filter(|e| !e.in_use())
            .map(|e| {
                e.leases += 1;
                ProbeTarget { id: e.id, config: e.config.clone(), client: e.client.clone() }
            })
            .collect();
        HealthBatch { evicted, targets }
    }

    fn complete_health_check(&self, batch: HealthBatch<C::Client>) -> HealthReport {
        let mut report = HealthReport {
            checked: batch.targets.len(),
            evicted: batch.evicted,
            ..Default::default()
        };

        // Network I/O, lock released
        let outcomes: Vec<(u64, Option<Result<C::Client, PoolError>>)> = batch
            .targets
            .into_iter()
            .map(|t| {
                let healthy = t.client.as_ref().is_some_and(|c| self.connector.probe(c));
                let repair = if healthy { None } else { Some(self.connector.connect(&t.config)) };
                (t.id, repair)
            })
            .collect();

        let mut state = self.lock();
        let max_errors = self.settings.max_errors;
        let mut dropped = 0u64;
        for (id, repair) in outcomes {
            let Some(pos) = state.entries.iter().position(|e| e.id == id) else {
                continue;
            };
            let entry = &mut state.entries[pos];
            entry.leases = entry.leases.saturating_sub(1);
            match repair {
                None => {}
                Some(Ok(client)) => {
                    entry.client = Some(client);
                    entry.error_count = 0;
                    report.reinitialized += 1;
                }
                Some(Err(e)) => {
                    entry.error_count += 1;
                    report.failed += 1;
                    log::warn!("pool: entry {} failed re-initialization: {}", entry.id, e);
                    if entry.error_count >= max_errors && entry.client.is_some() && !entry.in_use() {
                        state.entries.remove(pos);
                        dropped += 1;
                    }
                }
            }
        }

        state.counters.dropped_errors += dropped;
        state.counters.reinitialized += report.reinitialized as u64;
        state.counters.health_checks += 1;

        if report.evicted + report.reinitialized + report.failed > 0 {
            log::info!(
                "pool health: checked {}, evicted {}, reinitialized {}, failed {}",
                report.checked, report.evicted, report.reinitialized, report.failed
            );
        }
        report
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        let in_use = state.entries.iter().filter(|e| e.in_use()).count();
        PoolStatus {
            endpoint: self.endpoint.api_url.clone(),
            max_connections: self.settings.max_connections,
            total: state.entries.len(),
            in_use,
            idle: state.entries.len() - in_use,
            degraded: state.entries.iter().filter(|e| e.client.is_none()).count(),
            error_counts: state.entries.iter().map(|e| e.error_count).collect(),
            counters: state.counters.clone(),
        }
    }

    /// Drop every idle entry. Leased entries stay until their TTL lapses.
    pub fn close(&self) {
        let mut state = self.lock();
        state.entries.retain(|e| e.in_use());
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct MockState {
        fail_connect: AtomicBool,
        fail_probe: AtomicBool,
        connects: AtomicU64,
        probes: AtomicU64,
        probe_delay_ms: AtomicU64,
    }

    struct MockConnector(Arc<MockState>);

    impl Connector for MockConnector {
        type Client = u64;

        fn connect(&self, _endpoint: &EndpointConfig) -> Result<u64, PoolError> {
            if self.0.fail_connect.load(Ordering::SeqCst) {
                return Err(PoolError::Connect("refused".to_string()));
            }
            Ok(self.0.connects.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn probe(&self, _client: &u64) -> bool {
            self.0.probes.fetch_add(1, Ordering::SeqCst);
            let delay = self.0.probe_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                std::thread::sleep(Duration::from_millis(delay));
            }
            !self.0.fail_probe.load(Ordering::SeqCst)
        }
    }

    fn settings(max: usize, ttl_secs: u64) -> PoolSettings {
        PoolSettings {
            max_connections: max,
            ttl_secs,
            health_check_interval_secs: 3600,
            max_errors: 2,
            on_init_failure: InitFailurePolicy::Fail,
        }
    }

    fn pool(s: PoolSettings) -> (Arc<MockState>, ConnectionPool<MockConnector>) {
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(MockConnector(state.clone()), EndpointConfig::default(), s).unwrap();
        (state, pool)
    }

    #[test]
    fn rejects_zero_capacity() {
        let r = ConnectionPool::new(
            MockConnector(Arc::new(MockState::default())),
            EndpointConfig::default(),
            settings(0, 60),
        );
        assert!(matches!(r, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn reuses_released_connection() {
        let (mock, pool) = pool(settings(3, 60));
        let a = pool.get_connection().unwrap();
        let id = a.entry_id();
        pool.release_connection(a);
        let b = pool.get_connection().unwrap();
        assert_eq!(b.entry_id(), id);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn never_exceeds_max_connections() {
        let (mock, pool) = pool(settings(2, 60));
        let held: Vec<_> = (0..6).map(|_| pool.get_connection().unwrap()).collect();
        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.in_use, 2);
        assert_eq!(status.counters.shared, 4);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 2);

        for conn in held {
            pool.release_connection(conn);
        }
        assert_eq!(pool.status().idle, 2);
    }

    #[test]
    fn saturated_pool_shares_least_recently_used() {
        let (_mock, pool) = pool(settings(2, 60));
        let first = pool.get_connection().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = pool.get_connection().unwrap();
        let third = pool.get_connection().unwrap();
        assert_eq!(third.entry_id(), first.entry_id());
        assert_ne!(second.entry_id(), first.entry_id());
    }

    #[test]
    fn idle_past_ttl_is_not_returned() {
        let (mock, pool) = pool(settings(2, 0));
        let a = pool.get_connection().unwrap();
        let old_id = a.entry_id();
        pool.release_connection(a);
        std::thread::sleep(Duration::from_millis(20));

        let b = pool.get_connection().unwrap();
        assert_ne!(b.entry_id(), old_id);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().counters.evicted_idle, 1);
    }

    #[test]
    fn init_failure_fails_loudly_by_default() {
        let (mock, pool) = pool(settings(2, 60));
        mock.fail_connect.store(true, Ordering::SeqCst);
        assert!(matches!(pool.get_connection(), Err(PoolError::Connect(_))));
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.status().counters.init_failures, 1);
    }

    #[test]
    fn degrade_policy_returns_detectable_handle() {
        let mut s = settings(2, 60);
        s.on_init_failure = InitFailurePolicy::Degrade;
        let (mock, pool) = pool(s);
        mock.fail_connect.store(true, Ordering::SeqCst);

        let conn = pool.get_connection().unwrap();
        assert!(conn.is_degraded());
        assert!(conn.client().is_none());
        pool.release_connection(conn);
        assert_eq!(pool.status().degraded, 1);

        // Health check repairs the degraded entry once the endpoint recovers
        mock.fail_connect.store(false, Ordering::SeqCst);
        let report = pool.run_health_check();
        assert_eq!(report.reinitialized, 1);
        assert!(!pool.get_connection().unwrap().is_degraded());
    }

    #[test]
    fn health_check_reinitializes_failed_probe() {
        let (mock, pool) = pool(settings(2, 60));
        let conn = pool.get_connection().unwrap();
        assert_eq!(conn.client(), Some(&1));
        pool.release_connection(conn);

        mock.fail_probe.store(true, Ordering::SeqCst);
        let report = pool.run_health_check();
        assert_eq!(report, HealthReport { checked: 1, evicted: 0, reinitialized: 1, failed: 0 });

        mock.fail_probe.store(false, Ordering::SeqCst);
        assert_eq!(pool.get_connection().unwrap().client(), Some(&2));
    }

    #[test]
    fn get_connection_runs_due_health_check() {
        let mut s = settings(2, 60);
        s.health_check_interval_secs = 0;
        let (mock, pool) = pool(s);
        let conn = pool.get_connection().unwrap();
        let id = conn.entry_id();
        assert_eq!(conn.client(), Some(&1));
        pool.release_connection(conn);

        mock.fail_probe.store(true, Ordering::SeqCst);
        let conn = pool.get_connection().unwrap();
        assert_eq!(conn.entry_id(), id);
        assert_eq!(conn.client(), Some(&2));

        let counters = pool.status().counters;
        assert_eq!(counters.reinitialized, 1);
        assert_eq!(counters.health_checks, 2);
    }

    #[test]
    fn health_check_does_not_block_other_callers() {
        let (mock, pool) = pool(settings(2, 60));
        let pool = Arc::new(pool);
        let conn = pool.get_connection().unwrap();
        pool.release_connection(conn);
        mock.probe_delay_ms.store(500, Ordering::SeqCst);

        let checker = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.run_health_check())
        };
        while mock.probes.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        let other = pool.get_connection().unwrap();
        let waited = started.elapsed();
        pool.release_connection(other);
        assert!(waited < Duration::from_millis(250), "get_connection waited {:?}", waited);

        let report = checker.join().unwrap();
        assert_eq!(report.checked, 1);
        // The probed entry was leased to the checker, so a second one was created
        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.in_use, 0);
    }

    #[test]
    fn errors_drop_entry_at_limit() {
        let (_mock, pool) = pool(settings(2, 60));
        let conn = pool.get_connection().unwrap();
        pool.release_with_error(conn);
        assert_eq!(pool.status().total, 1);
        let conn = pool.get_connection().unwrap();
        pool.release_with_error(conn);
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.status().counters.dropped_errors, 1);
    }

    #[test]
    fn with_connection_releases_on_both_paths() {
        let (_mock, pool) = pool(settings(1, 60));
        let ok: Result<u64, PoolError> = pool.with_connection(|c| Ok(*c.client().unwrap()));
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(pool.status().in_use, 0);

        let err: Result<(), PoolError> = pool.with_connection(|_| Err(PoolError::Connect("boom".into())));
        assert!(err.is_err());
        let status = pool.status();
        assert_eq!(status.in_use, 0);
        assert_eq!(status.error_counts, vec![1]);
    }

    #[derive(Debug)]
    enum CallError {
        Transport,
        Rejected,
    }

    impl From<PoolError> for CallError {
        fn from(_: PoolError) -> Self {
            CallError::Transport
        }
    }

    impl ConnectionFault for CallError {
        fn is_connection_fault(&self) -> bool {
            matches!(self, CallError::Transport)
        }
    }

    #[test]
    fn request_errors_do_not_count_against_entry() {
        let (_mock, pool) = pool(settings(1, 60));
        for _ in 0..5 {
            let r: Result<(), CallError> = pool.with_connection(|_| Err(CallError::Rejected));
            assert!(r.is_err());
        }
        let status = pool.status();
        assert_eq!(status.total, 1);
        assert_eq!(status.error_counts, vec![0]);

        let r: Result<(), CallError> = pool.with_connection(|_| Err(CallError::Transport));
        assert!(matches!(r, Err(CallError::Transport)));
        assert_eq!(pool.status().error_counts, vec![1]);
    }

    #[test]
    fn close_drops_idle_entries() {
        let (_mock, pool) = pool(settings(3, 60));
        let a = pool.get_connection().unwrap();
        let b = pool.get_connection().unwrap();
        pool.release_connection(a);
        pool.close();
        assert_eq!(pool.status().total, 1);
        pool.release_connection(b);
    }
}
