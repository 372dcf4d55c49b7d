use chart_assignment_apis::{AssignedChart, ChartAssignmentPhase};
use std::{collections::HashMap, sync::Mutex};

#[cfg(test)]
use mockall::automock;

/// Latest known state of a release as reported by the release engine.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ReleaseStatus {
    pub phase: ChartAssignmentPhase,
    pub error: Option<String>,
}

/// The deployment engine driving releases of ChartAssignments. Releases are
/// keyed by ChartAssignment name. Updates and deletions are asynchronous and
/// idempotent, progress is observed through [`ReleaseEngine::status`].
#[cfg_attr(test, automock)]
pub(crate) trait ReleaseEngine: Send + Sync {
    fn ensure_updated(&self, name: &str, chart: &AssignedChart);

    fn ensure_deleted(&self, name: &str);

    fn status(&self, name: &str) -> Option<ReleaseStatus>;

    /// Drops what is known about a release whose deletion has been observed.
    fn forget(&self, name: &str);
}

struct Release {
    chart: Option<AssignedChart>,
    status: ReleaseStatus,
}

/// Bookkeeping [`ReleaseEngine`] for environments without a deployment
/// backend: it records the desired chart of each release and reports it as
/// settled right away, deletions are reported as completed.
#[derive(Default)]
pub(crate) struct ReleaseRegistry {
    releases: Mutex<HashMap<String, Release>>,
}

impl ReleaseRegistry {
    fn with_releases<T>(&self, f: impl FnOnce(&mut HashMap<String, Release>) -> T) -> T {
        let mut guard = match self.releases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    #[cfg(test)]
    pub(crate) fn desired_chart(&self, name: &str) -> Option<AssignedChart> {
        self.with_releases(|releases| releases.get(name).and_then(|r| r.chart.clone()))
    }
}

impl ReleaseEngine for ReleaseRegistry {
    fn ensure_updated(&self, name: &str, chart: &AssignedChart) {
        self.with_releases(|releases| {
            let release = releases.entry(name.to_string()).or_insert_with(|| Release {
                chart: None,
                status: ReleaseStatus {
                    phase: ChartAssignmentPhase::Pending,
                    error: None,
                },
            });
            if release.chart.as_ref() != Some(chart)
                || release.status.phase != ChartAssignmentPhase::Settled
            {
                info!("recording release {}", name);
                release.chart = Some(chart.clone());
                release.status = ReleaseStatus {
                    phase: ChartAssignmentPhase::Settled,
                    error: None,
                };
            }
        })
    }

    fn ensure_deleted(&self, name: &str) {
        self.with_releases(|releases| {
            let release = releases.entry(name.to_string()).or_insert_with(|| Release {
                chart: None,
                status: ReleaseStatus {
                    phase: ChartAssignmentPhase::Deleted,
                    error: None,
                },
            });
            if release.status.phase != ChartAssignmentPhase::Deleted {
                info!("deleting release {}", name);
                release.chart = None;
                release.status.phase = ChartAssignmentPhase::Deleted;
                release.status.error = None;
            }
        })
    }

    fn status(&self, name: &str) -> Option<ReleaseStatus> {
        self.with_releases(|releases| releases.get(name).map(|r| r.status.clone()))
    }

    fn forget(&self, name: &str) {
        self.with_releases(|releases| {
            if releases
                .get(name)
                .is_some_and(|r| r.status.phase == ChartAssignmentPhase::Deleted)
            {
                releases.remove(name);
            }
        })
    }
}
