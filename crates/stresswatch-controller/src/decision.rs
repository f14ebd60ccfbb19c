//! Pure reconcile decision: given a Pod snapshot and the fault resources
//! listed from its namespace, work out which experiments to activate.
//!
//! Nothing here performs I/O. The reconciler feeds it store snapshots and
//! hands the resulting [`Decision`] to the patch applier.

use crate::error::{ControllerError, Result};
use crate::idempotency::ActivationState;
use crate::matcher::matching_fault_resources;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;
use std::fmt;
use stresswatch_core::resources::{is_chaos_eligible, test_instance};
use stresswatch_core::{NetworkChaos, PodPhase, ResourceKey, TEST_INSTANCE_LABEL};

/// Fault resources to activate for one Pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub pod_key: ResourceKey,
    /// Deduplicated, ordered by key
    pub targets: Vec<ResourceKey>,
    pub mark_pod: bool,
}

/// Why a reconciliation made no changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    PodNotFound,
    ExcludedNamespace(String),
    NotRunning(PodPhase),
    AlreadyStarted,
    NotChaosEligible,
    NoMatchingFaultResource { test_instance: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PodNotFound => write!(f, "pod no longer exists"),
            SkipReason::ExcludedNamespace(ns) => write!(f, "namespace '{}' is excluded", ns),
            SkipReason::NotRunning(phase) => write!(f, "pod is in '{}', not 'Running' phase", phase),
            SkipReason::AlreadyStarted => write!(f, "chaos already started for pod"),
            SkipReason::NotChaosEligible => write!(f, "pod is not labelled for chaos"),
            SkipReason::NoMatchingFaultResource { test_instance } => {
                write!(f, "no fault resource selects testInstance '{}'", test_instance)
            }
        }
    }
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Activate(Decision),
    Skip(SkipReason),
}

/// Outcome of [`screen`]: either a skip or the Pod's test instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening<'a> {
    Skip(SkipReason),
    Eligible { pod_key: ResourceKey, test_instance: &'a str },
}

fn pod_key(pod: &Pod) -> Result<ResourceKey> {
    let name = pod
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::internal_error("Pod has no name"))?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    Ok(ResourceKey::pod(namespace, name))
}

/// The Pod-only checks of the decision, usable before any fault resources
/// are listed.
pub fn screen<'a>(pod: &'a Pod, excluded_namespaces: &[String]) -> Result<Screening<'a>> {
    let key = pod_key(pod)?;

    if excluded_namespaces.iter().any(|ns| *ns == key.namespace) {
        return Ok(Screening::Skip(SkipReason::ExcludedNamespace(key.namespace)));
    }

    let phase = PodPhase::of(pod);
    if phase != PodPhase::Running {
        return Ok(Screening::Skip(SkipReason::NotRunning(phase)));
    }

    if ActivationState::of(pod).is_started() {
        return Ok(Screening::Skip(SkipReason::AlreadyStarted));
    }

    if !is_chaos_eligible(pod) {
        return Ok(Screening::Skip(SkipReason::NotChaosEligible));
    }

    match test_instance(pod) {
        Some(instance) => Ok(Screening::Eligible {
            pod_key: key,
            test_instance: instance,
        }),
        None => Err(ControllerError::missing_test_instance(&key, TEST_INSTANCE_LABEL)),
    }
}

/// Decide which fault resources to activate for `pod`.
///
/// A chaos-eligible Pod without a `testInstance` label is a configuration
/// error. See [`select_targets`] for how candidates are matched.
pub fn decide(
    pod: &Pod,
    candidates: &[NetworkChaos],
    excluded_namespaces: &[String],
) -> Result<Verdict> {
    match screen(pod, excluded_namespaces)? {
        Screening::Skip(reason) => Ok(Verdict::Skip(reason)),
        Screening::Eligible {
            pod_key,
            test_instance,
        } => Ok(select_targets(pod_key, test_instance, candidates)),
    }
}

/// Match candidates for a Pod that already passed [`screen`].
///
/// Candidates outside the Pod's namespace are ignored; a candidate with no
/// namespace is taken to be in the Pod's namespace.
pub fn select_targets(
    pod_key: ResourceKey,
    test_instance: &str,
    candidates: &[NetworkChaos],
) -> Verdict {
    let namespace = pod_key.namespace.as_str();
    let in_namespace = candidates
        .iter()
        .filter(|c| c.metadata.namespace.as_deref().unwrap_or(namespace) == namespace);

    let targets: BTreeSet<ResourceKey> = matching_fault_resources(test_instance, in_namespace)
        .into_iter()
        .filter_map(|c| c.metadata.name.as_deref())
        .map(|name| ResourceKey::network_chaos(namespace, name))
        .collect();

    if targets.is_empty() {
        return Verdict::Skip(SkipReason::NoMatchingFaultResource {
            test_instance: test_instance.to_string(),
        });
    }

    Verdict::Activate(Decision {
        pod_key,
        targets: targets.into_iter().collect(),
        mark_pod: true,
    })
}
