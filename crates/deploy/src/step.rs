//! Deployment steps and the dependency graph that orders them.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use alloy_core::{dyn_abi::DynSolValue, primitives::Address};
use derive_more::{Deref, Display};
use serde::{Deserialize, Serialize};

use crate::{
    artifacts::{ContractArtifact, ContractSpec},
    error::DeployError,
};

/// Identifier of a step. Also the logical name its result is recorded under.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deref, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Addresses of a step's declared dependencies, read from the deployment
/// record. Looking up anything else fails.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAddresses {
    addresses: BTreeMap<StepId, Address>,
}

impl ResolvedAddresses {
    pub(crate) fn new(addresses: BTreeMap<StepId, Address>) -> Self {
        Self { addresses }
    }

    pub fn get(&self, id: &str) -> Result<Address, String> {
        self.addresses
            .get(&StepId::from(id))
            .copied()
            .ok_or_else(|| format!("{id} is not a declared dependency"))
    }

    /// `get` wrapped as an ABI `address` value.
    pub fn arg(&self, id: &str) -> Result<DynSolValue, String> {
        self.get(id).map(DynSolValue::Address)
    }
}

type ArgResolver =
    Arc<dyn Fn(&ResolvedAddresses) -> Result<Vec<DynSolValue>, String> + Send + Sync>;

/// Deploys one contract once its dependencies exist.
#[derive(Clone)]
pub struct DeploymentStep {
    pub id: StepId,
    pub artifact: ContractArtifact,
    pub depends_on: Vec<StepId>,
    pub gas_limit: Option<u64>,
    resolve_args: ArgResolver,
}

impl fmt::Debug for DeploymentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentStep")
            .field("id", &self.id)
            .field("artifact", &self.artifact.name)
            .field("depends_on", &self.depends_on)
            .field("gas_limit", &self.gas_limit)
            .finish_non_exhaustive()
    }
}

impl DeploymentStep {
    /// A step without dependencies or constructor arguments.
    pub fn new(id: impl Into<StepId>, artifact: ContractArtifact) -> Self {
        Self {
            id: id.into(),
            artifact,
            depends_on: Vec::new(),
            gas_limit: None,
            resolve_args: Arc::new(|_| Ok(Vec::new())),
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Constructor arguments computed from the dependency addresses.
    pub fn with_args<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&ResolvedAddresses) -> Result<Vec<DynSolValue>, String> + Send + Sync + 'static,
    {
        self.resolve_args = Arc::new(resolve);
        self
    }

    /// Fixed constructor arguments.
    pub fn with_static_args(self, args: Vec<DynSolValue>) -> Self {
        self.with_args(move |_| Ok(args.clone()))
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn logical_name(&self) -> &str {
        self.id.as_str()
    }

    /// Resolve the full contract spec for `deps`.
    pub fn contract_spec(&self, deps: &ResolvedAddresses) -> Result<ContractSpec, String> {
        Ok(ContractSpec {
            logical_name: self.id.to_string(),
            artifact: self.artifact.clone(),
            constructor_args: (self.resolve_args)(deps)?,
        })
    }
}

/// Ordered set of steps.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: DeploymentStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: DeploymentStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn get(&self, id: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.id.as_str() == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn validate_ids(&self) -> Result<(), DeployError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(DeployError::DuplicateStep {
                    id: step.id.to_string(),
                });
            }
        }
        for step in &self.steps {
            if let Some(missing) = step.depends_on.iter().find(|d| !seen.contains(d)) {
                return Err(DeployError::UnknownDependency {
                    step: step.id.to_string(),
                    dependency: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Topological order of the steps. Among steps that are ready at the same
    /// time, the one declared first goes first.
    pub fn execution_order(&self) -> Result<Vec<&DeploymentStep>, DeployError> {
        self.validate_ids()?;

        let mut remaining: HashMap<&StepId, usize> = self
            .steps
            .iter()
            .map(|s| {
                let unique: HashSet<&StepId> = s.depends_on.iter().collect();
                (&s.id, unique.len())
            })
            .collect();
        let mut emitted = vec![false; self.steps.len()];
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(next) = self
            .steps
            .iter()
            .enumerate()
            .position(|(i, s)| !emitted[i] && remaining.get(&s.id) == Some(&0))
        {
            emitted[next] = true;
            let done = &self.steps[next];
            order.push(done);

            for step in &self.steps {
                if step.depends_on.contains(&done.id) {
                    if let Some(count) = remaining.get_mut(&step.id) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }

        if order.len() < self.steps.len() {
            let ids = self
                .steps
                .iter()
                .zip(&emitted)
                .filter(|(_, done)| !**done)
                .map(|(s, _)| s.id.to_string())
                .collect();
            return Err(DeployError::CyclicDependency { ids });
        }

        Ok(order)
    }

    /// Plan holding `id` and everything it transitively depends on, in
    /// declaration order.
    pub fn restricted_to(&self, id: &str) -> Result<Self, DeployError> {
        self.validate_ids()?;

        let root = self.get(id).ok_or_else(|| DeployError::UnknownDependency {
            step: "<requested>".to_string(),
            dependency: id.to_string(),
        })?;

        let mut keep: HashSet<&StepId> = HashSet::new();
        let mut stack = vec![root];
        while let Some(step) = stack.pop() {
            if keep.insert(&step.id) {
                stack.extend(
                    step.depends_on
                        .iter()
                        .filter_map(|dep| self.get(dep.as_str())),
                );
            }
        }

        Ok(Self {
            steps: self
                .steps
                .iter()
                .filter(|s| keep.contains(&s.id))
                .cloned()
                .collect(),
        })
    }
}
