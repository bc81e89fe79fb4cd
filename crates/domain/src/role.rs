use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use custodian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::resource::{FieldSet, ResourceType, validated_token};
use crate::security::Permission;

/// Role name, for example `attending-physician`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct RoleName(String);

impl RoleName {
    /// Creates a validated role name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        validated_token("role name", value.into(), 64, false).map(Self)
    }

    /// Returns the role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for RoleName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Display for RoleName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Reference to the exact role version a principal held when acting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleVersionRef {
    /// Role name.
    pub name: RoleName,
    /// Role version.
    pub version: u32,
}

impl Display for RoleVersionRef {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}@{}", self.name, self.version)
    }
}

/// One immutable version of a role definition.
///
/// Changes to a role append a new version; existing versions are never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleVersion {
    name: RoleName,
    version: u32,
    permissions: BTreeSet<Permission>,
    field_entitlements: BTreeMap<ResourceType, FieldSet>,
}

impl RoleVersion {
    /// Creates a role version.
    pub fn new(
        name: RoleName,
        version: u32,
        permissions: BTreeSet<Permission>,
        field_entitlements: BTreeMap<ResourceType, FieldSet>,
    ) -> AppResult<Self> {
        if version == 0 {
            return Err(AppError::Validation(
                "role version must start at 1".to_owned(),
            ));
        }

        Ok(Self {
            name,
            version,
            permissions,
            field_entitlements,
        })
    }

    /// Returns the role name.
    #[must_use]
    pub fn name(&self) -> &RoleName {
        &self.name
    }

    /// Returns the version number.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns a reference to this exact version.
    #[must_use]
    pub fn version_ref(&self) -> RoleVersionRef {
        RoleVersionRef {
            name: self.name.clone(),
            version: self.version,
        }
    }

    /// Returns granted permissions.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<Permission> {
        &self.permissions
    }

    /// Returns field entitlements per resource type.
    #[must_use]
    pub fn field_entitlements(&self) -> &BTreeMap<ResourceType, FieldSet> {
        &self.field_entitlements
    }

    /// Returns fields this role may see for a resource type.
    #[must_use]
    pub fn entitled_fields(&self, resource_type: &ResourceType) -> Option<&FieldSet> {
        self.field_entitlements.get(resource_type)
    }
}
