//! Schedule Builder: spec.md §4.1.
//!
//! Pure function of (service catalog, submission parameters, file type) to
//! an ordered list of stages. Pattern matching follows the original
//! `scheduler.py`, which anchors `re.match` at the start of the file type
//! string; we mirror that with an anchored `regex::Regex` per declared
//! pattern (the catalog itself is the thing cached across a dispatch pass,
//! per spec.md §9 — not the compiled regexes, since file types vary per
//! file within the same pass).

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

use crate::types::{CategorySet, Schedule, ServiceCatalog, ServiceDescriptor, SubmissionParams, SYSTEM_CATEGORY};

/// Expand a list of service-or-category names into a flat set of service
/// names, resolving each category to its member services (spec.md §4.1
/// steps 1–2).
fn expand_names(catalog: &ServiceCatalog, names: &[String]) -> HashSet<String> {
    let mut out = HashSet::new();
    for name in names {
        if catalog.services.iter().any(|s| &s.category == name) {
            for svc in catalog.by_category(name) {
                out.insert(svc.name.clone());
            }
        } else {
            out.insert(name.clone());
        }
    }
    out
}

fn matches_anchored(patterns: &[String], file_type: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| match Regex::new(&format!("^(?:{p})")) {
        Ok(re) => re.is_match(file_type),
        Err(e) => {
            warn!(pattern = %p, error = %e, "invalid service file-type pattern, treating as non-match");
            false
        }
    })
}

fn accepts(svc: &ServiceDescriptor, file_type: &str) -> bool {
    let accepted = svc.accepts.is_empty() || matches_anchored(&svc.accepts, file_type);
    let rejected = !svc.rejects.is_empty() && matches_anchored(&svc.rejects, file_type);
    accepted && !rejected
}

/// Build the ordered stage list for one (submission, file_type) pair
/// (spec.md §4.1).
pub fn build_schedule(
    catalog: &ServiceCatalog,
    params: &SubmissionParams,
    file_type: &str,
    stage_order: &[String],
) -> Schedule {
    let excluded = expand_names(catalog, &params.excluded_services);

    let selected: HashSet<String> = if params.selected_services.is_empty() {
        catalog.services.iter().map(|s| s.name.clone()).collect()
    } else {
        expand_names(catalog, &params.selected_services)
    };

    let mandatory: CategorySet = catalog
        .by_category(SYSTEM_CATEGORY)
        .map(|s| s.name.clone())
        .collect();

    let mut retained: HashSet<String> = selected
        .into_iter()
        .filter(|name| !excluded.contains(name) || mandatory.contains(name))
        .collect();
    retained.extend(mandatory);

    let mut stages: Vec<Vec<String>> = stage_order.iter().map(|_| Vec::new()).collect();
    let stage_index: std::collections::HashMap<&str, usize> = stage_order
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    // Deterministic order: iterate the catalog, not the hash set, so the
    // within-stage ordering of a given schedule is stable across calls
    // even though "unordered" per spec.md §5.
    for svc in &catalog.services {
        if !retained.contains(&svc.name) {
            continue;
        }
        if !accepts(svc, file_type) {
            continue;
        }
        match stage_index.get(svc.stage.as_str()) {
            Some(&idx) => stages[idx].push(svc.name.clone()),
            None => warn!(service = %svc.name, stage = %svc.stage, "service references unknown stage, dropping"),
        }
    }

    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubmissionParamSpec;

    fn svc(name: &str, category: &str, stage: &str, accepts: &[&str], rejects: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            category: category.to_string(),
            stage: stage.to_string(),
            accepts: accepts.iter().map(|s| s.to_string()).collect(),
            rejects: rejects.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 60,
            submission_params: Vec::<SubmissionParamSpec>::new(),
        }
    }

    fn stages() -> Vec<String> {
        vec!["filter".into(), "core".into(), "post".into()]
    }

    #[test]
    fn any_type_service_always_included() {
        let catalog = ServiceCatalog {
            services: vec![svc("sv1", "static", "core", &[], &[])],
        };
        let schedule = build_schedule(&catalog, &SubmissionParams::default(), "document/pdf", &stages());
        assert_eq!(schedule, vec![vec![], vec!["sv1".to_string()], vec![]]);
    }

    #[test]
    fn rejects_wins_over_accepts_overlap() {
        let catalog = ServiceCatalog {
            services: vec![svc("sv1", "static", "core", &["document.*"], &["document/pdf"])],
        };
        let schedule = build_schedule(&catalog, &SubmissionParams::default(), "document/pdf", &stages());
        assert!(schedule.iter().all(|stage| stage.is_empty()));
    }

    #[test]
    fn excluded_service_dropped_unless_system() {
        let catalog = ServiceCatalog {
            services: vec![
                svc("sv1", "static", "core", &[], &[]),
                svc("sv2", "system", "core", &[], &[]),
            ],
        };
        let mut params = SubmissionParams::default();
        params.excluded_services = vec!["sv1".to_string(), "sv2".to_string()];
        let schedule = build_schedule(&catalog, &params, "document/pdf", &stages());
        assert_eq!(schedule[1], vec!["sv2".to_string()]);
    }

    #[test]
    fn category_exclusion_expands_to_members() {
        let catalog = ServiceCatalog {
            services: vec![
                svc("sv1", "static", "core", &[], &[]),
                svc("sv2", "static", "core", &[], &[]),
            ],
        };
        let mut params = SubmissionParams::default();
        params.excluded_services = vec!["static".to_string()];
        let schedule = build_schedule(&catalog, &params, "document/pdf", &stages());
        assert!(schedule.iter().all(|stage| stage.is_empty()));
    }

    #[test]
    fn unknown_stage_dropped_silently() {
        let catalog = ServiceCatalog {
            services: vec![svc("sv1", "static", "nonexistent-stage", &[], &[])],
        };
        let schedule = build_schedule(&catalog, &SubmissionParams::default(), "document/pdf", &stages());
        assert!(schedule.iter().all(|stage| stage.is_empty()));
    }
}
