//! Sequences deployment steps, persists results and resumes interrupted runs.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::PathBuf,
};

use alloy_core::primitives::Address;
use chrono::Utc;
use tokio::sync::watch;

use crate::{
    client::{ChainClient, TxOutcome, TxStatus, transaction_outcome},
    constraint::{AddressConstraint, ConstraintViolation, Ledger, Validation, Zone},
    error::{ChainError, DeployError, StepFailure},
    network::NetworkId,
    record::{DeploymentEntry, DeploymentRecord, PendingEntry},
    step::{DeploymentPlan, DeploymentStep, ResolvedAddresses, StepId},
    store::DeploymentStore,
};

/// Something worth reporting about a deployment that does not fail it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentWarning {
    /// The contract landed outside the configured placement rules.
    AddressConstraint {
        logical_name: String,
        violation: ConstraintViolation,
    },
    /// A reused contract was deployed from different bytecode than the current
    /// artifact.
    ArtifactDrift {
        logical_name: String,
        recorded: String,
        current: String,
    },
}

impl fmt::Display for DeploymentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressConstraint {
                logical_name,
                violation,
            } => write!(f, "{logical_name}: {violation}"),
            Self::ArtifactDrift {
                logical_name,
                recorded,
                current,
            } => write!(
                f,
                "{logical_name}: deployed from bytecode {recorded}, current artifact is {current}"
            ),
        }
    }
}

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub record: DeploymentRecord,
    /// Steps whose contract was deployed (or whose pending deployment was
    /// confirmed) during this run.
    pub deployed: Vec<StepId>,
    /// Steps satisfied by an existing record entry.
    pub reused: Vec<StepId>,
    pub warnings: Vec<DeploymentWarning>,
}

impl DeploymentOutcome {
    pub fn address(&self, id: &str) -> Option<Address> {
        self.record.address(id)
    }
}

/// Deploys a [`DeploymentPlan`] against one network.
///
/// All chain-mutating calls go through a single [`ChainClient`], one step at a
/// time. The record is flushed to the store after every change, so a run that
/// stops early can be resumed by running the same plan again.
pub struct Orchestrator<C, S> {
    client: C,
    store: S,
    constraint: Option<AddressConstraint>,
    abort: Option<watch::Receiver<bool>>,
    redeploy: HashSet<StepId>,
    metadata_dir: Option<PathBuf>,
}

impl<C: ChainClient, S: DeploymentStore> Orchestrator<C, S> {
    pub fn new(client: C, store: S) -> Self {
        Self {
            client,
            store,
            constraint: None,
            abort: None,
            redeploy: HashSet::new(),
            metadata_dir: None,
        }
    }

    /// Check every deployed address against `constraint`.
    pub fn with_constraint(mut self, constraint: AddressConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Stop before the next step once `abort` turns `true`.
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Deploy these steps again even when the record already has them.
    pub fn with_redeploy<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<StepId>,
    {
        self.redeploy = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Write `<Name>_abi.json` for every freshly deployed contract.
    pub fn with_metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metadata_dir = Some(dir.into());
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn constraint(&self) -> Option<&AddressConstraint> {
        self.constraint.as_ref()
    }

    fn abort_requested(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn flush(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        self.store.save(record)
    }

    /// Run `plan` on `network`.
    ///
    /// The dependency graph is validated before anything else happens. Steps
    /// already in the network's record are reused. The first failing step
    /// stops the run with [`DeployError::StepFailed`]; everything confirmed up
    /// to that point is already persisted.
    pub async fn run(
        &self,
        plan: &DeploymentPlan,
        network: &NetworkId,
    ) -> Result<DeploymentOutcome, DeployError> {
        let order = plan.execution_order()?;
        let mut record = self.store.load(network)?;

        tracing::info!(
            %network,
            steps = order.len(),
            existing = record.entries.len(),
            sender = %self.client.sender(),
            "Starting deployment"
        );

        let mut outcome = DeploymentOutcome {
            record: DeploymentRecord::empty(network.clone()),
            deployed: Vec::new(),
            reused: Vec::new(),
            warnings: Vec::new(),
        };

        for (completed, step) in order.into_iter().enumerate() {
            if self.abort_requested() {
                tracing::warn!(completed, "Deployment aborted");
                return Err(DeployError::Aborted { completed });
            }

            let name = step.logical_name();

            if self.redeploy.contains(&step.id) && record.entries.remove(name).is_some() {
                tracing::info!(logical_name = name, "Forcing redeployment");
            }

            let recovered = self.recover_pending(step, &mut record).await?;

            let address = match record.get(name) {
                Some(entry) if !recovered => {
                    let address = entry.address;
                    if let Some(warning) = self.check_drift(step, entry) {
                        tracing::warn!(%warning, "Artifact changed since deployment");
                        outcome.warnings.push(warning);
                    }
                    tracing::info!(logical_name = name, %address, "Reusing deployed contract");
                    outcome.reused.push(step.id.clone());
                    address
                }
                Some(entry) => {
                    outcome.deployed.push(step.id.clone());
                    entry.address
                }
                None => {
                    let address = self.deploy_step(step, &mut record).await?;
                    outcome.deployed.push(step.id.clone());
                    address
                }
            };

            if let Some(warning) = self.check_constraint(name, address) {
                tracing::warn!(%warning, "Address outside configured shard range");
                outcome.warnings.push(warning);
            }
        }

        tracing::info!(
            %network,
            deployed = outcome.deployed.len(),
            reused = outcome.reused.len(),
            warnings = outcome.warnings.len(),
            "Deployment complete"
        );

        outcome.record = record;
        Ok(outcome)
    }

    /// Settle a deployment left pending by an earlier run.
    ///
    /// Returns `true` when the pending transaction turned out confirmed and its
    /// contract was adopted into the record. A transaction the node still holds
    /// is waited for; if that wait fails the marker stays for the next run.
    async fn recover_pending(
        &self,
        step: &DeploymentStep,
        record: &mut DeploymentRecord,
    ) -> Result<bool, DeployError> {
        let name = step.logical_name();
        let Some(pending) = record.pending.get(name).cloned() else {
            return Ok(false);
        };
        let tx_hash = pending.transaction_hash;

        tracing::info!(
            logical_name = name,
            %tx_hash,
            "Re-querying deployment left pending by a previous run"
        );

        let outcome = transaction_outcome(&self.client, tx_hash)
            .await
            .map_err(|e| step_failed(name, e))?;

        let receipt = match outcome {
            TxOutcome::Confirmed(receipt) | TxOutcome::Reverted(receipt) => Some(receipt),
            TxOutcome::Pending => {
                tracing::info!(
                    logical_name = name,
                    %tx_hash,
                    "Pending deployment still in flight, waiting for it"
                );
                let receipt = self
                    .client
                    .wait_for_receipt(tx_hash)
                    .await
                    .map_err(|e| step_failed(name, e))?;
                Some(receipt)
            }
            TxOutcome::Unknown => None,
        };

        let Some(receipt) = receipt.filter(|r| r.status == TxStatus::Confirmed) else {
            record.clear_pending(name);
            self.flush(record)?;
            tracing::info!(
                logical_name = name,
                %tx_hash,
                "Pending deployment did not land, deploying again"
            );
            return Ok(false);
        };

        let address = receipt.contract_address.ok_or_else(|| {
            step_failed(
                name,
                StepFailure::MissingContractAddress {
                    tx_hash: receipt.transaction_hash,
                },
            )
        })?;
        record.insert(
            name,
            DeploymentEntry::new(address, receipt.transaction_hash, pending.fingerprint),
        );
        self.flush(record)?;
        tracing::info!(logical_name = name, %address, "Pending deployment confirmed");
        self.after_deploy(step, address)?;
        Ok(true)
    }

    async fn deploy_step(
        &self,
        step: &DeploymentStep,
        record: &mut DeploymentRecord,
    ) -> Result<Address, DeployError> {
        let name = step.logical_name();

        let deps = resolve_dependencies(step, record).map_err(|e| step_failed(name, e))?;
        let spec = step
            .contract_spec(&deps)
            .map_err(|e| step_failed(name, StepFailure::Arguments(e)))?;
        let init_code = spec
            .init_code()
            .map_err(|e| step_failed(name, StepFailure::Arguments(e)))?;
        let fingerprint = step.artifact.fingerprint();

        tracing::info!(
            logical_name = name,
            contract = %step.artifact.name,
            args = spec.constructor_args.len(),
            "Deploying contract"
        );

        let pending = self
            .client
            .deploy(init_code, step.gas_limit)
            .await
            .map_err(|e| step_failed(name, e))?;

        // Persisted before waiting: if this process dies the next run can
        // re-query the transaction instead of deploying twice.
        record.mark_pending(
            name,
            PendingEntry {
                transaction_hash: pending.tx_hash,
                submitted_at: Utc::now(),
                fingerprint: Some(fingerprint.clone()),
            },
        );
        self.flush(record)?;

        tracing::debug!(logical_name = name, tx_hash = %pending.tx_hash, "Waiting for deployment");

        let receipt = self
            .client
            .wait_for_receipt(pending.tx_hash)
            .await
            .map_err(|e| step_failed(name, e))?;

        if receipt.status == TxStatus::Reverted {
            record.clear_pending(name);
            self.flush(record)?;
            return Err(step_failed(
                name,
                ChainError::Reverted {
                    tx_hash: receipt.transaction_hash,
                },
            ));
        }

        let address = match (receipt.contract_address, pending.predicted_address) {
            (Some(address), _) => address,
            (None, Some(predicted)) => {
                tracing::debug!(
                    logical_name = name,
                    %predicted,
                    "Receipt has no contract address, using the nonce-derived one"
                );
                predicted
            }
            (None, None) => {
                return Err(step_failed(
                    name,
                    StepFailure::MissingContractAddress {
                        tx_hash: receipt.transaction_hash,
                    },
                ));
            }
        };

        record.insert(
            name,
            DeploymentEntry::new(address, receipt.transaction_hash, Some(fingerprint)),
        );
        self.flush(record)?;

        tracing::info!(
            logical_name = name,
            %address,
            tx_hash = %receipt.transaction_hash,
            block_number = ?receipt.block_number,
            "Contract deployed"
        );

        self.after_deploy(step, address)?;
        Ok(address)
    }

    fn after_deploy(&self, step: &DeploymentStep, address: Address) -> Result<(), DeployError> {
        let zone = Zone::from_address(address);
        tracing::info!(
            logical_name = step.logical_name(),
            %zone,
            ledger = %Ledger::from_address(address),
            "Contract placement"
        );

        if let Some(dir) = &self.metadata_dir {
            let path = step.artifact.export_abi(dir)?;
            tracing::debug!(path = %path.display(), "ABI exported");
        }
        Ok(())
    }

    fn check_drift(
        &self,
        step: &DeploymentStep,
        entry: &DeploymentEntry,
    ) -> Option<DeploymentWarning> {
        let recorded = entry.fingerprint.as_ref()?;
        let current = step.artifact.fingerprint();
        (*recorded != current).then(|| DeploymentWarning::ArtifactDrift {
            logical_name: step.id.to_string(),
            recorded: recorded.clone(),
            current,
        })
    }

    fn check_constraint(&self, name: &str, address: Address) -> Option<DeploymentWarning> {
        match self.constraint.as_ref()?.validate(address) {
            Validation::Ok => None,
            Validation::Violation(violation) => Some(DeploymentWarning::AddressConstraint {
                logical_name: name.to_string(),
                violation,
            }),
        }
    }
}

/// Addresses of `step`'s dependencies, read from the record so reused and
/// freshly deployed dependencies look the same.
fn resolve_dependencies(
    step: &DeploymentStep,
    record: &DeploymentRecord,
) -> Result<ResolvedAddresses, StepFailure> {
    let mut addresses = BTreeMap::new();
    for dep in &step.depends_on {
        let address = record.address(dep.as_str()).ok_or_else(|| {
            StepFailure::Arguments(format!("dependency {dep} has no recorded address"))
        })?;
        addresses.insert(dep.clone(), address);
    }
    Ok(ResolvedAddresses::new(addresses))
}

fn step_failed(logical_name: &str, cause: impl Into<StepFailure>) -> DeployError {
    DeployError::StepFailed {
        logical_name: logical_name.to_string(),
        cause: cause.into(),
    }
}
