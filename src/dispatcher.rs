//! Bounded-parallel host dispatch, grounded on `main.py`'s
//! `ThreadPoolExecutor(max_workers=parallel)` + `as_completed` shape, expressed with `rayon`
//! rather than a futures executor since every operation inside a host pass is blocking I/O.

use std::time::Duration;

use fleetpatch_api::error::{FleetPatchError, InternalError, ReportError};
use fleetpatch_api::model::{FleetReport, Host, UpdateResult};
use log::{info, warn};
use rayon::prelude::*;

/// Runs `process` for every host in `hosts`, at most `parallelism` at a time, and collects the
/// results into a [`FleetReport`]. Order of results is not guaranteed to match `hosts`.
pub fn dispatch(
    hosts: &[Host],
    parallelism: usize,
    timeout: Duration,
    process: impl Fn(&Host, Duration) -> UpdateResult + Sync,
) -> Result<FleetReport, FleetPatchError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()
        .structured(InternalError::ThreadPool)?;

    info!("Processing {} hosts with {parallelism} parallel connections", hosts.len());

    let results = pool.install(|| {
        hosts
            .par_iter()
            .map(|host| {
                let result = process(host, timeout);
                log_result(host, &result);
                result
            })
            .collect::<Vec<_>>()
    });

    Ok(FleetReport { results })
}

fn log_result(host: &Host, result: &UpdateResult) {
    if let Some(detail) = &result.detail {
        warn!("{}: {:?} - {detail}", host.name, result.outcome);
    } else if !result.updates.is_empty() {
        let security = result.security_updates().count();
        if security > 0 {
            warn!("{}: {security} SECURITY updates, {} regular updates", host.name, result.updates.len() - security);
        } else {
            info!("{}: {} updates available", host.name, result.updates.len());
        }
    } else {
        info!("{}: No updates needed", host.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetpatch_api::model::Outcome;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn host(name: &str) -> Host {
        Host {
            name: name.to_string(),
            address: format!("{name}.example.com"),
            port: 22,
            username: None,
            vars: BTreeMap::new(),
        }
    }

    #[test]
    fn dispatches_every_host_exactly_once() {
        let hosts: Vec<_> = (0..10).map(|i| host(&format!("host{i}"))).collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let report = dispatch(&hosts, 3, Duration::from_secs(1), move |h, _timeout| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            UpdateResult {
                host: h.name.clone(),
                outcome: Outcome::NoUpdates,
                os_info: None,
                updates: Vec::new(),
                detail: None,
                vm_node: None,
                vm_id: None,
                snapshot_name: None,
                start_time: now,
                end_time: now,
            }
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(report.results.len(), 10);
    }
}
