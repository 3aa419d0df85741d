// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: worker lifecycle, readiness polling, and restart policy
//! (§4.1, §4.2).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loader_adapters::{find_orphans, ProcessLauncher};
use loader_core::{HealthState, ServiceDescriptor, ServiceInstance, ServiceName};
use tokio::time::timeout;

use crate::error::SupervisorError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const ORPHAN_GRACE: Duration = Duration::from_secs(3);
const GRACEFUL_STOP_GRACE: Duration = Duration::from_secs(2);

/// Queries a worker's standard health probe (§6). Implemented over the real
/// wire transport in production, faked in tests.
#[async_trait]
pub trait HealthClient: Send + Sync {
    async fn check(&self, descriptor: &ServiceDescriptor) -> HealthState;
}

/// Connects to a worker's loopback port and issues the standard `Check`
/// RPC, matching the `{"rpc": "Check", "payload": {...}}` envelope every
/// worker's request enum shares (§6).
pub struct TcpHealthClient {
    pub probe_timeout: Duration,
}

impl Default for TcpHealthClient {
    fn default() -> Self {
        Self { probe_timeout: Duration::from_secs(2) }
    }
}

#[async_trait]
impl HealthClient for TcpHealthClient {
    async fn check(&self, descriptor: &ServiceDescriptor) -> HealthState {
        match timeout(self.probe_timeout, self.check_inner(descriptor)).await {
            Ok(Ok(status)) => status,
            // Transport error or timeout both map to UNKNOWN (§4.2).
            Ok(Err(_)) | Err(_) => HealthState::Unknown,
        }
    }
}

impl TcpHealthClient {
    async fn check_inner(&self, descriptor: &ServiceDescriptor) -> Result<HealthState, loader_wire::TransportError> {
        let mut stream = tokio::net::TcpStream::connect(descriptor.addr()).await?;
        let envelope = serde_json::json!({
            "rpc": "Check",
            "payload": { "service_name": "" },
        });
        loader_wire::write_frame(&mut stream, &envelope).await?;
        let response: loader_wire::CheckResponse = loader_wire::read_frame(&mut stream).await?;
        Ok(response.status)
    }
}

/// Owns every worker's lifecycle state. One instance lives for the life of
/// the orchestrator process.
///
/// Readiness polling is bounded by wall-clock `tokio::time::timeout` rather
/// than an injected `Clock`: unlike the dialog machine's reducer, this module
/// performs real process and socket I/O, so there is no deterministic
/// "virtual time" to test against — tests use short real timeouts instead.
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    health: Arc<dyn HealthClient>,
    descriptors: HashMap<ServiceName, ServiceDescriptor>,
    instances: HashMap<ServiceName, ServiceInstance>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        health: Arc<dyn HealthClient>,
        descriptors: Vec<ServiceDescriptor>,
    ) -> Self {
        let instances = descriptors.iter().map(|d| (d.name, ServiceInstance::new(d.name))).collect();
        let descriptors = descriptors.into_iter().map(|d| (d.name, d)).collect();
        Self { launcher, health, descriptors, instances }
    }

    pub fn instance(&self, name: ServiceName) -> Option<&ServiceInstance> {
        self.instances.get(&name)
    }

    /// Step 1 of §4.1: kill leftover processes from a previous run, then
    /// wait for the OS to reclaim their accelerator memory.
    pub async fn clear_orphans(&self) {
        for descriptor in self.descriptors.values() {
            for pid in find_orphans(&descriptor.exe_path) {
                let _ = self.launcher.kill(pid).await;
            }
        }
        tokio::time::sleep(ORPHAN_GRACE).await;
    }

    /// Start every worker strictly in `ServiceName::BOOT_ORDER`, polling
    /// each to `SERVING` before moving to the next (§4.1 step 3).
    pub async fn start_all(&mut self) -> Result<(), SupervisorError> {
        for name in ServiceName::BOOT_ORDER {
            self.start_worker(name).await?;
        }
        Ok(())
    }

    pub async fn start_worker(&mut self, name: ServiceName) -> Result<(), SupervisorError> {
        let descriptor = self
            .descriptors
            .get(&name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?
            .clone();

        if self.instances.get(&name).is_some_and(|i| i.pid.is_some()) {
            return Err(SupervisorError::AlreadyRunning(name));
        }

        let pid = self.launcher.spawn(&descriptor.exe_path, &descriptor.exe_args).await?;
        let instance = self.instances.entry(name).or_insert_with(|| ServiceInstance::new(name));
        instance.pid = Some(pid);

        self.poll_until_serving(name, descriptor.readiness_timeout).await
    }

    async fn poll_until_serving(&mut self, name: ServiceName, readiness_timeout: Duration) -> Result<(), SupervisorError> {
        let descriptor = self.descriptors[&name].clone();
        let poll_interval = POLL_INTERVAL.min(readiness_timeout);
        let deadline = tokio::time::Instant::now() + readiness_timeout;

        loop {
            let status = match timeout(deadline.saturating_duration_since(tokio::time::Instant::now()), self.health.check(&descriptor)).await {
                Ok(status) => status,
                Err(_) => {
                    return Err(SupervisorError::ReadinessTimeout {
                        service: name,
                        timeout_ms: readiness_timeout.as_millis() as u64,
                    })
                }
            };
            if let Some(instance) = self.instances.get_mut(&name) {
                instance.record_health(status);
                if instance.is_ready() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::ReadinessTimeout {
                    service: name,
                    timeout_ms: readiness_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Attempt a bounded restart of a crashed worker (§4.1 "Restart policy").
    pub async fn restart_worker(&mut self, name: ServiceName) -> Result<(), SupervisorError> {
        let can_restart = self.instances.get(&name).is_some_and(|i| i.can_restart());
        if !can_restart {
            return Err(SupervisorError::RestartBudgetExhausted { service: name });
        }
        let backoff = self.instances[&name].next_backoff();
        tokio::time::sleep(backoff).await;
        if let Some(instance) = self.instances.get_mut(&name) {
            instance.restart_count += 1;
            instance.pid = None;
        }
        self.start_worker(name).await
    }

    /// Graceful-then-forced stop, idempotent (§8 property 7): stopping a
    /// worker with no recorded pid is a no-op.
    pub async fn stop_worker(&mut self, name: ServiceName) -> Result<(), SupervisorError> {
        let Some(pid) = self.instances.get(&name).and_then(|i| i.pid) else {
            return Ok(());
        };
        self.launcher.terminate(pid).await?;
        tokio::time::sleep(GRACEFUL_STOP_GRACE).await;
        if self.launcher.is_alive(pid) {
            self.launcher.kill(pid).await?;
        }
        if let Some(instance) = self.instances.get_mut(&name) {
            instance.pid = None;
        }
        Ok(())
    }

    /// Stop every running worker in the reverse of boot order (§4.1
    /// "Shutdown").
    pub async fn stop_all(&mut self) -> Result<(), SupervisorError> {
        for name in ServiceName::BOOT_ORDER.into_iter().rev() {
            self.stop_worker(name).await?;
        }
        Ok(())
    }

    pub fn pids(&self) -> HashMap<String, u32> {
        self.instances
            .iter()
            .filter_map(|(name, inst)| inst.pid.map(|pid| (name.to_string(), pid)))
            .collect()
    }

    pub fn health_snapshot(&self) -> HashMap<String, HealthState> {
        self.instances.iter().map(|(name, inst)| (name.to_string(), inst.health)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loader_core::default_readiness_timeout;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeLauncher {
        next_pid: AtomicU32,
    }

    impl Default for FakeLauncher {
        fn default() -> Self {
            Self { next_pid: AtomicU32::new(1) }
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn spawn(&self, _exe_path: &std::path::Path, _args: &[String]) -> Result<u32, loader_adapters::ProcessError> {
            Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
        }
        async fn terminate(&self, _pid: u32) -> Result<(), loader_adapters::ProcessError> {
            Ok(())
        }
        async fn kill(&self, _pid: u32) -> Result<(), loader_adapters::ProcessError> {
            Ok(())
        }
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    struct AlwaysServing;

    #[async_trait]
    impl HealthClient for AlwaysServing {
        async fn check(&self, _descriptor: &ServiceDescriptor) -> HealthState {
            HealthState::Serving
        }
    }

    struct NeverServing;

    #[async_trait]
    impl HealthClient for NeverServing {
        async fn check(&self, _descriptor: &ServiceDescriptor) -> HealthState {
            HealthState::NotServing
        }
    }

    fn descriptors() -> Vec<ServiceDescriptor> {
        ServiceName::BOOT_ORDER
            .into_iter()
            .enumerate()
            .map(|(i, name)| ServiceDescriptor {
                name,
                port: 5001 + i as u16,
                exe_path: PathBuf::from(format!("/bin/{name}")),
                exe_args: vec![],
                readiness_timeout: Duration::from_millis(20),
            })
            .collect()
    }

    #[tokio::test]
    async fn start_all_boots_every_worker_in_order_when_always_serving() {
        let mut sup = Supervisor::new(
            Arc::new(FakeLauncher::default()),
            Arc::new(AlwaysServing),
            descriptors(),
        );
        sup.start_all().await.expect("should boot cleanly");
        for name in ServiceName::BOOT_ORDER {
            assert!(sup.instance(name).unwrap().is_ready());
        }
    }

    #[tokio::test]
    async fn start_worker_times_out_when_never_serving() {
        let mut sup = Supervisor::new(
            Arc::new(FakeLauncher::default()),
            Arc::new(NeverServing),
            descriptors(),
        );
        let err = sup.start_worker(ServiceName::Logger).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ReadinessTimeout { service: ServiceName::Logger, .. }));
    }

    #[tokio::test]
    async fn stopping_a_worker_that_never_started_is_a_noop() {
        let mut sup = Supervisor::new(
            Arc::new(FakeLauncher::default()),
            Arc::new(AlwaysServing),
            descriptors(),
        );
        assert!(sup.stop_worker(ServiceName::Tts).await.is_ok());
    }

    #[tokio::test]
    async fn restart_respects_budget() {
        let mut sup = Supervisor::new(
            Arc::new(FakeLauncher::default()),
            Arc::new(AlwaysServing),
            descriptors(),
        );
        sup.start_worker(ServiceName::Kwd).await.unwrap();
        for _ in 0..loader_core::MAX_RESTARTS {
            if let Some(inst) = sup.instances.get_mut(&ServiceName::Kwd) {
                inst.pid = None;
            }
            sup.restart_worker(ServiceName::Kwd).await.unwrap();
        }
        let err = sup.restart_worker(ServiceName::Kwd).await.unwrap_err();
        assert!(matches!(err, SupervisorError::RestartBudgetExhausted { .. }));
    }

    #[test]
    fn default_readiness_timeouts_match_boot_order_profile() {
        assert_eq!(default_readiness_timeout(ServiceName::Logger), Duration::from_secs(10));
        assert_eq!(default_readiness_timeout(ServiceName::Stt), Duration::from_secs(30));
    }
}
