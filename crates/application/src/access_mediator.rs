//! Single choke point for every access to a protected resource.
//!
//! Each mediated call is decided, executed under a timeout and audited
//! exactly once. Audit writes run on detached tasks so that a caller
//! dropping its future cannot cancel them.

mod operations;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use custodian_core::{AppError, AppResult, RequestContext};
use custodian_domain::{AuditEntry, AuditOutcome, FailureCode, OperationalEvent, RoleVersionRef};
use tokio::runtime::Handle;

use crate::{
    AccessRequest, AuditReceipt, AuditRecorder, AuditRetryPolicy, AuthorizationDecision,
    AuthorizationService, ReconciliationItem, ReconciliationQueue,
};

pub use operations::{
    DeleteOperation, FnOperation, ReadOperation, ResourceOperation, RollbackOutcome,
    WriteOperation,
};

/// Access mediator service.
#[derive(Clone)]
pub struct AccessMediator {
    authorization: AuthorizationService,
    recorder: AuditRecorder,
    reconciliation: Arc<dyn ReconciliationQueue>,
    operation_timeout: Duration,
    decision_retry: AuditRetryPolicy,
}

impl AccessMediator {
    /// Creates a mediator.
    #[must_use]
    pub fn new(
        authorization: AuthorizationService,
        recorder: AuditRecorder,
        reconciliation: Arc<dyn ReconciliationQueue>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            authorization,
            recorder,
            reconciliation,
            operation_timeout,
            decision_retry: AuditRetryPolicy::default(),
        }
    }

    /// Sets how transient authorization lookup failures are retried.
    #[must_use]
    pub fn with_decision_retry(mut self, retry: AuditRetryPolicy) -> Self {
        self.decision_retry = retry;
        self
    }

    /// Returns the authorization service behind this mediator.
    #[must_use]
    pub fn authorization(&self) -> &AuthorizationService {
        &self.authorization
    }

    async fn decide_with_retry(
        &self,
        context: &RequestContext,
        request: &AccessRequest,
    ) -> AppResult<AuthorizationDecision> {
        let mut attempt = 1;
        loop {
            match self.authorization.decide(context.principal_id(), request).await {
                Err(error)
                    if error.is_transient() && attempt < self.decision_retry.max_attempts =>
                {
                    tracing::warn!(
                        correlation_id = %context.correlation_id(),
                        attempt,
                        error = %error,
                        "authorization lookup failed, retrying"
                    );
                    tokio::time::sleep(self.decision_retry.backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Decides, runs and audits one operation.
    ///
    /// Denied calls never reach `operation` and fail with `AccessDenied`,
    /// whether the principal lacks permission or the resource is absent. A
    /// call whose audit record cannot be persisted fails with
    /// `AuditWriteFailure` after its effect is rolled back or flagged for
    /// reconciliation.
    pub async fn mediate<O>(
        &self,
        context: &RequestContext,
        request: AccessRequest,
        mut operation: O,
    ) -> AppResult<O::Output>
    where
        O: ResourceOperation,
    {
        let entry = AuditEntry::new(
            context.principal_id(),
            Vec::new(),
            request.action,
            request.resource.clone(),
            AuditOutcome::Failure(FailureCode::Cancelled),
            context.channel().clone(),
            context.correlation_id(),
        );
        let mut pending = PendingAudit::arm(self.recorder.clone(), entry);

        let decision = match self.decide_with_retry(context, &request).await {
            Ok(decision) => decision,
            Err(error) => {
                tracing::error!(
                    correlation_id = %context.correlation_id(),
                    error = %error,
                    "authorization lookup failed"
                );
                let entry =
                    pending.disarm_with(AuditOutcome::Failure(FailureCode::DecisionUnavailable));
                self.record_detached(entry).await?;
                return Err(AppError::Unavailable(format!(
                    "authorization lookup failed: {error}"
                )));
            }
        };
        pending.set_roles(decision.roles.clone());

        let Some(grant) = decision.grant() else {
            let entry = pending.disarm_with(AuditOutcome::Denied(
                decision.denial.unwrap_or(FailureCode::NotPermitted),
            ));
            self.record_detached(entry).await?;
            return Err(AppError::AccessDenied);
        };

        let result =
            match tokio::time::timeout(self.operation_timeout, operation.execute(&grant)).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(error)) => Err((FailureCode::OperationFailed, error)),
                Err(_) => Err((
                    FailureCode::Timeout,
                    AppError::Unavailable(format!(
                        "operation timed out after {} ms",
                        self.operation_timeout.as_millis()
                    )),
                )),
            };

        let outcome = match &result {
            Ok(_) => AuditOutcome::Success,
            Err((code, _)) => AuditOutcome::Failure(*code),
        };
        let entry = pending.disarm_with(outcome);
        let correlation_id = entry.correlation_id();
        let resource = entry.resource().clone();

        if let Err(audit_error) = self.record_detached(entry).await {
            if result.is_ok() {
                self.compensate(&mut operation, context, &request).await;
            }
            tracing::error!(
                correlation_id = %correlation_id,
                resource = %resource,
                error = %audit_error,
                "mediated call failed closed on audit write"
            );
            return Err(audit_error);
        }

        result.map_err(|(_, error)| error)
    }

    async fn record_detached(&self, entry: AuditEntry) -> AppResult<AuditReceipt> {
        let recorder = self.recorder.clone();
        tokio::spawn(async move { recorder.record(entry).await })
            .await
            .map_err(|error| AppError::AuditWriteFailure(format!("audit task failed: {error}")))?
    }

    async fn compensate<O>(
        &self,
        operation: &mut O,
        context: &RequestContext,
        request: &AccessRequest,
    ) where
        O: ResourceOperation,
    {
        match operation.roll_back().await {
            Ok(RollbackOutcome::RolledBack) => {
                tracing::warn!(
                    correlation_id = %context.correlation_id(),
                    resource = %request.resource,
                    "rolled back unaudited operation"
                );
                return;
            }
            Ok(RollbackOutcome::NotSupported) => {}
            Err(error) => {
                tracing::error!(
                    correlation_id = %context.correlation_id(),
                    resource = %request.resource,
                    error = %error,
                    "rollback of unaudited operation failed"
                );
            }
        }

        let item = ReconciliationItem {
            resource: request.resource.clone(),
            action: request.action,
            principal_id: context.principal_id(),
            correlation_id: context.correlation_id(),
            flagged_at: Utc::now(),
        };
        if let Err(error) = self.reconciliation.enqueue(item).await {
            tracing::error!(
                correlation_id = %context.correlation_id(),
                error = %error,
                "failed to flag unaudited operation for reconciliation"
            );
        }
        self.recorder
            .escalate(OperationalEvent::ReconciliationRequired {
                resource: request.resource.clone(),
                correlation_id: context.correlation_id(),
            })
            .await;
    }
}

/// Records a cancelled outcome when a mediated call is dropped before its
/// final audit write was handed to a detached task.
struct PendingAudit {
    recorder: AuditRecorder,
    entry: AuditEntry,
    armed: bool,
}

impl PendingAudit {
    fn arm(recorder: AuditRecorder, entry: AuditEntry) -> Self {
        Self {
            recorder,
            entry,
            armed: true,
        }
    }

    fn set_roles(&mut self, roles: Vec<RoleVersionRef>) {
        self.entry = self.entry.clone().with_roles(roles);
    }

    fn disarm_with(&mut self, outcome: AuditOutcome) -> AuditEntry {
        self.armed = false;
        self.entry.clone().with_outcome(outcome)
    }
}

impl Drop for PendingAudit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let entry = self.entry.clone();
        let correlation_id = entry.correlation_id();
        match Handle::try_current() {
            Ok(handle) => {
                let recorder = self.recorder.clone();
                handle.spawn(async move {
                    if let Err(error) = recorder.record(entry).await {
                        tracing::error!(
                            correlation_id = %correlation_id,
                            error = %error,
                            "failed to record cancelled call"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    "cancelled call dropped outside a runtime, audit record lost"
                );
            }
        }
    }
}
