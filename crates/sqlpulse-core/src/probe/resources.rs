//! CPU and memory pressure. Best-effort: never fails, degrades to defaults.

use tracing::debug;

use crate::model::ResourceUsage;
use crate::source::{Connector, Row, Session};

use super::Monitor;
use super::queries::{CPU_RING_BUFFER, MEMORY_PROCESS, MEMORY_SYS_INFO};

/// Reported when no scheduler monitor record can be read.
pub const DEFAULT_CPU_USAGE: f64 = 100.0;
/// Reported when neither memory source yields a value.
pub const DEFAULT_MEMORY_USAGE: f64 = 0.0;

impl<C: Connector> Monitor<C> {
    /// Samples instance CPU and memory usage.
    ///
    /// CPU comes from the newest `RING_BUFFER_SCHEDULER_MONITOR` record
    /// (`100 - SystemIdle`). Memory is `committed_kb / committed_target_kb`
    /// from `sys.dm_os_sys_info`, falling back to
    /// `sys.dm_os_process_memory.memory_utilization_percentage`. Missing data,
    /// permission errors and connection failures all map to
    /// [`DEFAULT_CPU_USAGE`] / [`DEFAULT_MEMORY_USAGE`]; both values are
    /// clamped to `[0, 100]`.
    pub async fn resource_usage(&self) -> ResourceUsage {
        let mut session = match self.connector.connect().await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "resource usage: connection failed, reporting defaults");
                return ResourceUsage {
                    cpu_usage: DEFAULT_CPU_USAGE,
                    memory_usage: DEFAULT_MEMORY_USAGE,
                };
            }
        };

        let cpu = cpu_usage(&mut session).await;
        let memory = memory_usage(&mut session).await;
        session.close().await;

        ResourceUsage {
            cpu_usage: clamp_percent(cpu),
            memory_usage: clamp_percent(memory),
        }
    }
}

async fn cpu_usage<S: Session>(session: &mut S) -> f64 {
    let idle = match session.query(CPU_RING_BUFFER).await {
        Ok(rows) => rows.first().and_then(|row| row.f64(1).ok().flatten()),
        Err(e) => {
            debug!(error = %e, "ring buffer unavailable");
            None
        }
    };
    idle.map_or(DEFAULT_CPU_USAGE, |idle| 100.0 - idle)
}

async fn memory_usage<S: Session>(session: &mut S) -> f64 {
    match session.query(MEMORY_SYS_INFO).await {
        Ok(rows) => {
            if let Some(pct) = rows.first().and_then(committed_percent) {
                return pct;
            }
            debug!("sys_info returned no committed target, trying process memory");
        }
        Err(e) => debug!(error = %e, "sys_info unavailable, trying process memory"),
    }

    match session.query(MEMORY_PROCESS).await {
        Ok(rows) => rows
            .first()
            .and_then(|row| row.f64(0).ok().flatten())
            .unwrap_or(DEFAULT_MEMORY_USAGE),
        Err(e) => {
            debug!(error = %e, "process memory unavailable");
            DEFAULT_MEMORY_USAGE
        }
    }
}

/// `committed / committed_target * 100`, `None` on null or zero target.
fn committed_percent(row: &Row) -> Option<f64> {
    let committed = row.f64(0).ok().flatten()?;
    let target = row.f64(1).ok().flatten()?;
    if target == 0.0 {
        return None;
    }
    Some(100.0 * committed / target)
}

/// Clamps to `[0, 100]`; NaN becomes 0.
fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::source::mock::MockConnector;

    fn monitor(connector: MockConnector) -> Monitor<MockConnector> {
        Monitor::new(connector)
    }

    #[tokio::test]
    async fn combines_ring_buffer_and_sys_info() {
        let m = monitor(
            MockConnector::new()
                .on("dm_os_ring_buffers", vec![row![812, 73]])
                .on("dm_os_sys_info", vec![row![4_000_000i64, 8_000_000i64]]),
        );
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, 27.0);
        assert_eq!(usage.memory_usage, 50.0);
        assert_eq!(m.connector().opened(), 1);
        assert_eq!(m.connector().closed(), 1);
    }

    #[tokio::test]
    async fn empty_ring_buffer_defaults_cpu() {
        let m = monitor(
            MockConnector::new()
                .on("dm_os_ring_buffers", vec![])
                .on("dm_os_sys_info", vec![row![1, 4]]),
        );
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, DEFAULT_CPU_USAGE);
        assert_eq!(usage.memory_usage, 25.0);
    }

    #[tokio::test]
    async fn null_idle_defaults_cpu() {
        let m = monitor(MockConnector::new().on("dm_os_ring_buffers", vec![row![1, None::<i64>]]));
        assert_eq!(m.resource_usage().await.cpu_usage, DEFAULT_CPU_USAGE);
    }

    #[tokio::test]
    async fn zero_target_falls_back_to_process_memory() {
        let m = monitor(
            MockConnector::new()
                .on("dm_os_ring_buffers", vec![row![1, 90]])
                .on("dm_os_sys_info", vec![row![1024, 0]])
                .on("dm_os_process_memory", vec![row![64]]),
        );
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, 10.0);
        assert_eq!(usage.memory_usage, 64.0);
    }

    #[tokio::test]
    async fn sys_info_error_falls_back_to_process_memory() {
        let m = monitor(
            MockConnector::new()
                .fail_on("dm_os_sys_info", "VIEW SERVER STATE permission was denied")
                .on("dm_os_process_memory", vec![row![81]]),
        );
        assert_eq!(m.resource_usage().await.memory_usage, 81.0);
    }

    #[tokio::test]
    async fn both_memory_sources_failing_defaults_memory() {
        let m = monitor(
            MockConnector::new()
                .on("dm_os_ring_buffers", vec![row![1, 50]])
                .fail_on("dm_os_sys_info", "denied")
                .fail_on("dm_os_process_memory", "denied"),
        );
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, 50.0);
        assert_eq!(usage.memory_usage, DEFAULT_MEMORY_USAGE);
    }

    #[tokio::test]
    async fn out_of_range_values_are_clamped() {
        let m = monitor(
            MockConnector::new()
                .on("dm_os_ring_buffers", vec![row![1, -20]])
                .on("dm_os_sys_info", vec![row![9_000i64, 3_000i64]]),
        );
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, 100.0);
        assert_eq!(usage.memory_usage, 100.0);

        let m = monitor(
            MockConnector::new()
                .on("dm_os_ring_buffers", vec![row![1, 250]])
                .on("dm_os_sys_info", vec![row![-5, 10]]),
        );
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, 0.0);
        assert_eq!(usage.memory_usage, 0.0);
    }

    #[tokio::test]
    async fn connection_failure_reports_defaults() {
        let m = monitor(MockConnector::new().refuse_connections("login failed for user 'sa'"));
        let usage = m.resource_usage().await;
        assert_eq!(usage.cpu_usage, DEFAULT_CPU_USAGE);
        assert_eq!(usage.memory_usage, DEFAULT_MEMORY_USAGE);
    }

    #[test]
    fn clamp_percent_bounds() {
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(f64::INFINITY), 100.0);
        assert_eq!(clamp_percent(42.5), 42.5);
    }
}
