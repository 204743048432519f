use dashmap::DashSet;
use nimbus_core::{Action, Cluster, EntityStatus, NimbusError, RemoteExecutor, TaskOutcome, TaskStatus};
use nimbus_store::{Database, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

/// Attempts at writing a terminal status before giving up.
const COMPLETION_ATTEMPTS: usize = 3;

/// Runs provisioning tasks on a bounded pool after their initial write.
///
/// The completion handler is the only writer of a cluster's terminal status.
pub struct Dispatcher {
    db: Arc<dyn Database>,
    executor: Arc<dyn RemoteExecutor>,
    permits: Arc<Semaphore>,
    launch_timeout: Duration,
    in_flight: Arc<DashSet<String>>,
    settled: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        executor: Arc<dyn RemoteExecutor>,
        workers: usize,
        launch_timeout: Duration,
    ) -> Self {
        Self {
            db,
            executor,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            launch_timeout,
            in_flight: Arc::new(DashSet::new()),
            settled: Arc::new(Notify::new()),
        }
    }

    /// Claim `cluster_id` before its INITED or STOPPING status is written.
    ///
    /// While the reservation lives the cluster counts as in flight, so the
    /// reconciliation sweep leaves it alone. Returns `None` when a run or
    /// another reservation already holds the id.
    pub fn reserve(&self, cluster_id: &str) -> Option<Reservation> {
        if !self.in_flight.insert(cluster_id.to_string()) {
            return None;
        }
        Some(Reservation {
            cluster_id: cluster_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
            settled: Arc::clone(&self.settled),
        })
    }

    /// Queue the run for a cluster persisted under `reservation`. The run
    /// keeps the reservation until its terminal status is written.
    pub fn submit(&self, reservation: Reservation, cluster: Cluster, action: Action) {
        debug_assert_eq!(reservation.cluster_id, cluster.id);
        info!(cluster_id = %cluster.id, action = %action, "Provisioning run queued");

        let task = Task {
            db: Arc::clone(&self.db),
            executor: Arc::clone(&self.executor),
            permits: Arc::clone(&self.permits),
            launch_timeout: self.launch_timeout,
        };
        tokio::spawn(task.run(reservation, cluster, action));
    }

    pub fn is_in_flight(&self, cluster_id: &str) -> bool {
        self.in_flight.contains(cluster_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait until no run for `cluster_id` is in flight.
    pub async fn wait_for(&self, cluster_id: &str) {
        loop {
            let notified = self.settled.notified();
            if !self.in_flight.contains(cluster_id) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until every queued run has completed.
    pub async fn drain(&self) {
        loop {
            let notified = self.settled.notified();
            if self.in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Holds a cluster id in the in-flight set; dropping it releases the id.
pub struct Reservation {
    cluster_id: String,
    in_flight: Arc<DashSet<String>>,
    settled: Arc<Notify>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_flight.remove(&self.cluster_id);
        self.settled.notify_waiters();
    }
}

struct Task {
    db: Arc<dyn Database>,
    executor: Arc<dyn RemoteExecutor>,
    permits: Arc<Semaphore>,
    launch_timeout: Duration,
}

impl Task {
    async fn run(self, reservation: Reservation, cluster: Cluster, action: Action) {
        let cluster_id = cluster.id.clone();
        let outcome = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(_permit) => self.execute(cluster, action).await,
            Err(_) => {
                error!(cluster_id = %cluster_id, "Worker pool closed");
                TaskOutcome::failed(TaskStatus::Fail, cluster)
            }
        };

        if let Err(e) = complete(self.db.as_ref(), action, outcome).await {
            error!(
                cluster_id = %cluster_id,
                action = %action,
                error = %e,
                "Terminal status not persisted, reconciliation required"
            );
        }
        drop(reservation);
    }

    async fn execute(&self, cluster: Cluster, action: Action) -> TaskOutcome {
        let fallback = cluster.clone();
        let executor = Arc::clone(&self.executor);
        let mut run = tokio::spawn(async move {
            match action {
                Action::Create => executor.create(cluster).await,
                Action::Update => executor.update(cluster).await,
                Action::Delete => executor.delete(cluster).await,
            }
        });

        match tokio::time::timeout(self.launch_timeout, &mut run).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(cluster_id = %fallback.id, action = %action, error = %e, "Provisioning run aborted");
                TaskOutcome::failed(TaskStatus::Fail, fallback)
            }
            Err(_) => {
                // Aborting drops the run and with it the automation subprocess.
                run.abort();
                warn!(
                    cluster_id = %fallback.id,
                    action = %action,
                    timeout_secs = self.launch_timeout.as_secs(),
                    "Provisioning run timed out"
                );
                TaskOutcome::failed(TaskStatus::Fail, fallback)
            }
        }
    }
}

/// Write the terminal state of a finished run.
///
/// Create/Update: ACTIVE on OK, else FAILED, keeping discovered addresses.
/// Delete: the record is removed on OK, else marked FAILED.
pub async fn complete(db: &dyn Database, action: Action, outcome: TaskOutcome) -> Result<(), NimbusError> {
    let TaskOutcome { status, cluster: result } = outcome;
    let succeeded = status.is_ok();

    if action == Action::Delete && succeeded {
        match db.delete_cluster(&result.project_id, &result.id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {
                info!(cluster_id = %result.id, "Cluster removed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let terminal = if succeeded { EntityStatus::Active } else { EntityStatus::Failed };
    for attempt in 1..=COMPLETION_ATTEMPTS {
        let Some(mut current) = db.read_cluster(&result.project_id, &result.id).await? else {
            warn!(cluster_id = %result.id, "Cluster vanished before its run completed");
            return Ok(());
        };
        current.entity_status = terminal;
        if action != Action::Delete {
            current.master_ip = result.master_ip.clone();
            current.services = result.services.clone();
        }

        match db.update_cluster(&current).await {
            Ok(stored) => {
                info!(
                    cluster_id = %stored.id,
                    action = %action,
                    status = %stored.entity_status,
                    task_status = ?status,
                    "Run completed"
                );
                return Ok(());
            }
            Err(StoreError::Conflict { .. }) if attempt < COMPLETION_ATTEMPTS => {
                warn!(cluster_id = %result.id, attempt, "Revision conflict writing terminal status, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(NimbusError::Conflict(result.id))
}
