//! Pure scheduling decisions over a snapshot of phase records.
//!
//! Nothing here touches storage; the runner fetches a snapshot, asks these
//! functions what to do, and performs the guarded writes itself.

use std::collections::HashMap;

use serplens_core::{PhaseRecord, PhaseRegistry, PhaseStatus};

use crate::error::Result;

/// Whether any record in the snapshot is currently running.
pub(crate) fn has_running(records: &[PhaseRecord]) -> bool {
    records
        .iter()
        .any(|record| record.status == PhaseStatus::Running)
}

/// Pending phases whose every dependency record is completed.
///
/// A dependency without a record in the snapshot counts as not completed,
/// so a phase with a missing dependency never becomes eligible.
pub(crate) fn eligible_phases<'a>(
    registry: &PhaseRegistry,
    records: &'a [PhaseRecord],
) -> Result<Vec<&'a str>> {
    let by_name: HashMap<&str, &PhaseRecord> = records
        .iter()
        .map(|record| (record.phase_name.as_str(), record))
        .collect();

    let mut eligible = Vec::new();
    for record in records {
        if record.status != PhaseStatus::Pending {
            continue;
        }
        let ready = registry
            .dependencies_of(&record.phase_name)?
            .iter()
            .all(|dep| {
                by_name
                    .get(*dep)
                    .map(|dep_record| dep_record.status == PhaseStatus::Completed)
                    .unwrap_or(false)
            });
        if ready {
            eligible.push(record.phase_name.as_str());
        }
    }
    Ok(eligible)
}

/// The phase the runner should claim next: the eligible phase that comes
/// first in topological order. `None` means the run loop is done.
pub(crate) fn next_phase(
    registry: &PhaseRegistry,
    records: &[PhaseRecord],
) -> Result<Option<String>> {
    let eligible = eligible_phases(registry, records)?;
    if eligible.is_empty() {
        return Ok(None);
    }
    for name in registry.topological_order() {
        if eligible.contains(&name) {
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

/// Still-pending transitive dependents of `failed_phase`. These are the
/// records a failure turns into blocked ones.
pub(crate) fn blocked_cone(
    registry: &PhaseRegistry,
    records: &[PhaseRecord],
    failed_phase: &str,
) -> Result<Vec<String>> {
    let dependents = registry.transitive_dependents(failed_phase)?;
    Ok(records
        .iter()
        .filter(|record| record.status == PhaseStatus::Pending)
        .filter(|record| dependents.contains(&record.phase_name.as_str()))
        .map(|record| record.phase_name.clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serplens_core::PhaseRegistry;
    use uuid::Uuid;

    fn diamond() -> PhaseRegistry {
        PhaseRegistry::from_edges(&[
            ("fetch", &[]),
            ("parse", &["fetch"]),
            ("enrich", &["fetch"]),
            ("report", &["parse", "enrich"]),
        ])
        .unwrap()
    }

    fn records_with(statuses: &[(&str, PhaseStatus)]) -> Vec<PhaseRecord> {
        let execution_id = Uuid::new_v4();
        statuses
            .iter()
            .map(|(name, status)| {
                let mut record = PhaseRecord::new(execution_id, name.to_string());
                record.status = *status;
                record
            })
            .collect()
    }

    #[test]
    fn test_only_root_eligible_at_start() {
        let registry = diamond();
        let records = records_with(&[
            ("fetch", PhaseStatus::Pending),
            ("parse", PhaseStatus::Pending),
            ("enrich", PhaseStatus::Pending),
            ("report", PhaseStatus::Pending),
        ]);

        let eligible = eligible_phases(&registry, &records).unwrap();
        assert_eq!(eligible, vec!["fetch"]);
        assert_eq!(next_phase(&registry, &records).unwrap().as_deref(), Some("fetch"));
    }

    #[test]
    fn test_fan_out_follows_topological_order() {
        let registry = diamond();
        let records = records_with(&[
            ("fetch", PhaseStatus::Completed),
            ("parse", PhaseStatus::Pending),
            ("enrich", PhaseStatus::Pending),
            ("report", PhaseStatus::Pending),
        ]);

        let eligible = eligible_phases(&registry, &records).unwrap();
        assert_eq!(eligible.len(), 2);
        // parse registered before enrich, so it is claimed first.
        assert_eq!(next_phase(&registry, &records).unwrap().as_deref(), Some("parse"));
    }

    #[test]
    fn test_join_waits_for_all_dependencies() {
        let registry = diamond();
        let records = records_with(&[
            ("fetch", PhaseStatus::Completed),
            ("parse", PhaseStatus::Completed),
            ("enrich", PhaseStatus::Running),
            ("report", PhaseStatus::Pending),
        ]);

        assert!(has_running(&records));
        let eligible = eligible_phases(&registry, &records).unwrap();
        assert!(eligible.is_empty());
    }

    #[test]
    fn test_no_phase_after_failure_empties_schedule() {
        let registry = diamond();
        let records = records_with(&[
            ("fetch", PhaseStatus::Completed),
            ("parse", PhaseStatus::Failed),
            ("enrich", PhaseStatus::Completed),
            ("report", PhaseStatus::Blocked),
        ]);

        assert_eq!(next_phase(&registry, &records).unwrap(), None);
    }

    #[test]
    fn test_blocked_cone_covers_pending_dependents_only() {
        let registry = diamond();
        let records = records_with(&[
            ("fetch", PhaseStatus::Completed),
            ("parse", PhaseStatus::Failed),
            ("enrich", PhaseStatus::Completed),
            ("report", PhaseStatus::Pending),
        ]);

        let cone = blocked_cone(&registry, &records, "parse").unwrap();
        assert_eq!(cone, vec!["report"]);

        // A leaf has no dependents to block.
        let cone = blocked_cone(&registry, &records, "report").unwrap();
        assert!(cone.is_empty());
    }

    #[test]
    fn test_disabled_dependency_blocks_eligibility() {
        let registry = diamond();
        // No record for fetch: parse must not become eligible.
        let records = records_with(&[
            ("parse", PhaseStatus::Pending),
            ("enrich", PhaseStatus::Pending),
        ]);

        let eligible = eligible_phases(&registry, &records).unwrap();
        assert!(eligible.is_empty());
    }
}
