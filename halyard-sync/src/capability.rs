//! Matching required capabilities against the ones the cluster provides.
//!
//! [`matches`] is pure; choosing among several matches is delegated to a
//! [`CapabilitySelector`] so the interactive prompt lives in the CLI.

use halyard_core::{Capability, CapabilitySpec, Component, RequiredCapabilityConfig};
use halyard_kube::Cluster;

use crate::error::SyncError;

/// Candidates satisfying `required`, in input order.
pub fn matches(required: &CapabilitySpec, candidates: &[Capability]) -> Vec<Capability> {
    candidates
        .iter()
        .filter(|candidate| candidate.spec.satisfies(required))
        .cloned()
        .collect()
}

/// Picks one capability among several matches for a requirement.
pub trait CapabilitySelector: Send + Sync {
    /// Return the name of the chosen capability. `candidates` is never empty.
    fn select(
        &self,
        requirement: &RequiredCapabilityConfig,
        candidates: &[Capability],
    ) -> Result<String, SyncError>;
}

/// Non-interactive policy: the first match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl CapabilitySelector for FirstMatch {
    fn select(
        &self,
        requirement: &RequiredCapabilityConfig,
        candidates: &[Capability],
    ) -> Result<String, SyncError> {
        candidates
            .first()
            .map(|c| c.name().to_owned())
            .ok_or_else(|| no_match(requirement))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The only match.
    Automatic(String),
    /// Chosen by a selector among several matches.
    Selected(String),
}

impl Resolution {
    pub fn name(&self) -> &str {
        match self {
            Resolution::Automatic(name) | Resolution::Selected(name) => name,
        }
    }
}

/// Decide which capability satisfies `requirement`.
pub fn resolve(
    requirement: &RequiredCapabilityConfig,
    matching: &[Capability],
    selector: &dyn CapabilitySelector,
) -> Result<Resolution, SyncError> {
    match matching {
        [] => Err(no_match(requirement)),
        [only] => Ok(Resolution::Automatic(only.name().to_owned())),
        several => selector
            .select(requirement, several)
            .map(Resolution::Selected),
    }
}

fn no_match(requirement: &RequiredCapabilityConfig) -> SyncError {
    SyncError::NoMatchingCapability {
        requirement: requirement.name.clone(),
        spec: requirement.spec.to_string(),
    }
}

/// Bind every auto-bindable, unbound requirement that has exactly one match.
///
/// Returns the names of the requirements that were bound. Requirements with
/// no match or several matches are left alone.
pub fn auto_bind(component: &mut Component, candidates: &[Capability]) -> Vec<String> {
    let mut bound = Vec::new();
    for requirement in component.spec.capabilities.requires.iter_mut() {
        if !requirement.auto_bindable || requirement.is_bound() {
            continue;
        }
        match matches(&requirement.spec, candidates).as_slice() {
            [only] => {
                requirement.bound_to = Some(only.name().to_owned());
                bound.push(requirement.name.clone());
            }
            [] => tracing::warn!(
                requirement = %requirement.name,
                spec = %requirement.spec,
                "no capability available for auto-binding"
            ),
            several => tracing::info!(
                requirement = %requirement.name,
                candidates = several.len(),
                "several capabilities match, leaving requirement unbound"
            ),
        }
    }
    bound
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub requirement: String,
    pub resolution: Resolution,
}

/// Outcome of [`bind`].
#[derive(Debug, Clone)]
pub struct BindReport {
    pub component: Component,
    pub bindings: Vec<Binding>,
    /// Requirements left untouched because they were already bound.
    pub already_bound: Vec<String>,
}

/// Bind the unbound requirements of component `name` (or all of them when
/// `rebind` is set) and store the result on the cluster.
pub async fn bind(
    cluster: &dyn Cluster,
    name: &str,
    selector: &dyn CapabilitySelector,
    rebind: bool,
) -> Result<BindReport, SyncError> {
    let mut component = cluster.get_component(name).await?;
    let candidates = cluster.list_capabilities().await?;

    let mut bindings = Vec::new();
    let mut already_bound = Vec::new();
    for requirement in component.spec.capabilities.requires.iter_mut() {
        if requirement.is_bound() && !rebind {
            already_bound.push(requirement.name.clone());
            continue;
        }
        let matching = matches(&requirement.spec, &candidates);
        let resolution = resolve(requirement, &matching, selector)?;
        tracing::info!(
            component = name,
            requirement = %requirement.name,
            capability = resolution.name(),
            "bound"
        );
        requirement.bound_to = Some(resolution.name().to_owned());
        bindings.push(Binding {
            requirement: requirement.name.clone(),
            resolution,
        });
    }

    if !bindings.is_empty() {
        component = cluster.update_component(&component).await?;
    }
    Ok(BindReport {
        component,
        bindings,
        already_bound,
    })
}
