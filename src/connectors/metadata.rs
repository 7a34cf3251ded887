//! Connector descriptor types
//!
//! Flattened, serializable views of a registered [`Connector`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::connectors::trait_::{Connector, FieldSpec};

/// Full description of a registered connector, including its field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectorDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub credential_fields: Vec<FieldSpec>,
    pub setting_fields: Vec<FieldSpec>,
}

impl ConnectorDescriptor {
    pub fn of(connector: &dyn Connector) -> Self {
        Self {
            name: connector.name().to_string(),
            version: connector.version().to_string(),
            description: connector.description().to_string(),
            credential_fields: connector.credential_fields(),
            setting_fields: connector.setting_fields(),
        }
    }

    /// True iff at least one credential field is required.
    pub fn requires_credentials(&self) -> bool {
        self.credential_fields.iter().any(|field| field.required)
    }
}

/// Identity-only view used by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectorMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl From<&ConnectorDescriptor> for ConnectorMetadata {
    fn from(descriptor: &ConnectorDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            description: descriptor.description.clone(),
        }
    }
}
