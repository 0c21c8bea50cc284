use std::str::FromStr;

use crate::error::StoreError;

/// Configuration relation named by a change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ResourceKind {
    #[strum(to_string = "providers", serialize = "provider_configs")]
    Providers,
    ApiKeys,
    VirtualKeys,
}

impl ResourceKind {
    pub(crate) const COUNT: usize = 3;

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Providers => 0,
            Self::ApiKeys => 1,
            Self::VirtualKeys => 2,
        }
    }
}

/// Kind of change applied to a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    /// Synthesized after a connection gap; notifications may have been missed
    Reload,
}

/// A typed change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigChangeEvent {
    pub resource: ResourceKind,
    pub operation: Operation,
}

impl ConfigChangeEvent {
    pub const fn new(resource: ResourceKind, operation: Operation) -> Self {
        Self { resource, operation }
    }

    /// Forced reload of one resource kind
    pub const fn reload(resource: ResourceKind) -> Self {
        Self::new(resource, Operation::Reload)
    }
}

impl FromStr for ConfigChangeEvent {
    type Err = StoreError;

    /// Parse a `<resource>:<OPERATION>` payload
    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidPayload(payload.to_owned());

        let (resource, operation) = payload.trim().split_once(':').ok_or_else(invalid)?;
        let resource = resource.trim().parse().map_err(|_| invalid())?;
        let operation = operation.trim().parse().map_err(|_| invalid())?;

        Ok(Self { resource, operation })
    }
}

impl std::fmt::Display for ConfigChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.operation)
    }
}
