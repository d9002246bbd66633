use std::{
    mem,
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};

use crate::{
    config::WeatherConfig,
    dispatch::{Dispatcher, ResponseRouter},
    error::TransportError,
    gate::ConnectivityGate,
    sink::UiSink,
    transport::{FetchRequest, Transport},
    types::RequestKind,
};

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        static START: OnceLock<Instant> = OnceLock::new();
        START
            .get_or_init(Instant::now)
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug)]
pub enum FetchState {
    AwaitingConnectivity,
    Requesting,
    AwaitingCompletion(Result<(), TransportError>),
    Sleeping,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub requests: u64,
    pub transport_failures: u64,
    pub applied: u64,
    pub last_applied_ms: Option<u64>,
}

pub struct FetchScheduler<T, S, C> {
    gate: Arc<ConnectivityGate>,
    transport: T,
    router: ResponseRouter<S>,
    clock: C,
    request: FetchRequest,
    interval: Duration,
    state: FetchState,
    stats: CycleStats,
}

impl<T, S, C> FetchScheduler<T, S, C>
where
    T: Transport,
    S: UiSink,
    C: Clock,
{
    pub fn new(
        gate: Arc<ConnectivityGate>,
        transport: T,
        dispatcher: Dispatcher<S>,
        clock: C,
        config: &WeatherConfig,
    ) -> Self {
        Self {
            gate,
            transport,
            router: ResponseRouter::new(dispatcher),
            clock,
            request: FetchRequest {
                kind: RequestKind::Weather,
                url: config.request_url(),
                timeout: config.request_timeout(),
            },
            interval: config.refresh_interval(),
            state: FetchState::AwaitingConnectivity,
            stats: CycleStats::default(),
        }
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn router(&self) -> &ResponseRouter<S> {
        &self.router
    }

    pub fn step(&mut self) {
        let current = mem::replace(&mut self.state, FetchState::Requesting);
        self.state = match current {
            FetchState::AwaitingConnectivity => {
                info!("waiting for network connectivity");
                self.gate.wait_connected();
                info!("network reachable; starting weather updates");
                FetchState::Requesting
            }
            FetchState::Requesting => {
                info!("requesting weather update");
                self.stats.requests = self.stats.requests.saturating_add(1);
                let outcome = self.transport.perform(&self.request, &mut self.router);
                FetchState::AwaitingCompletion(outcome)
            }
            FetchState::AwaitingCompletion(Ok(())) => {
                if self.router.take_last_reading().is_some() {
                    self.stats.applied = self.stats.applied.saturating_add(1);
                    self.stats.last_applied_ms = Some(self.clock.now_ms());
                }
                FetchState::Sleeping
            }
            FetchState::AwaitingCompletion(Err(err)) => {
                warn!("weather request failed: {err}");
                self.stats.transport_failures = self.stats.transport_failures.saturating_add(1);
                FetchState::Sleeping
            }
            FetchState::Sleeping => {
                info!(
                    "next weather update in {}s ({} requests, {} failed)",
                    self.interval.as_secs(),
                    self.stats.requests,
                    self.stats.transport_failures
                );
                self.clock.sleep(self.interval);
                FetchState::Requesting
            }
        };
    }

    pub fn run(mut self) -> ! {
        loop {
            self.step();
        }
    }
}
