use std::collections::BTreeSet;

use custodian_core::{AppError, AppResult, NonEmptyString, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::role::RoleName;

/// A durable identity that can act on protected resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: PrincipalId,
    handle: NonEmptyString,
    active: bool,
    roles: BTreeSet<RoleName>,
}

impl Principal {
    /// Creates an active principal. At least one role is required.
    pub fn new(
        id: PrincipalId,
        handle: NonEmptyString,
        roles: BTreeSet<RoleName>,
    ) -> AppResult<Self> {
        if roles.is_empty() {
            return Err(AppError::Validation(format!(
                "principal '{id}' must hold at least one role"
            )));
        }

        Ok(Self {
            id,
            handle,
            active: true,
            roles,
        })
    }

    /// Rebuilds a principal from persisted values.
    #[must_use]
    pub fn restore(
        id: PrincipalId,
        handle: NonEmptyString,
        active: bool,
        roles: BTreeSet<RoleName>,
    ) -> Self {
        Self {
            id,
            handle,
            active,
            roles,
        }
    }

    /// Returns the principal identifier.
    #[must_use]
    pub fn id(&self) -> PrincipalId {
        self.id
    }

    /// Returns the display handle.
    #[must_use]
    pub fn handle(&self) -> &str {
        self.handle.as_str()
    }

    /// Returns whether the principal may act.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the assigned roles.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<RoleName> {
        &self.roles
    }

    /// Deactivates the principal. Deactivation is permanent.
    pub fn deactivate(&mut self) -> AppResult<()> {
        if !self.active {
            return Err(AppError::Conflict(format!(
                "principal '{}' is already inactive",
                self.id
            )));
        }

        self.active = false;
        Ok(())
    }
}
