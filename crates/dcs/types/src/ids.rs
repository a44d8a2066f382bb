//! Identifier newtypes.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, uuid::Uuid::new_v4()))
            }
        }
    };
}

string_id!(
    /// Immutable contract identity.
    ContractId
);
string_id!(
    /// Template identity; paired with a version number for an exact reference.
    TemplateId
);
string_id!(
    /// Signing session identity, scoped to one contract.
    SessionId
);
string_id!(
    /// A party expected to sign.
    SignerId
);
string_id!(
    /// Reference to an externally issued identity or PoA credential.
    CredentialId
);
string_id!(
    /// Issuer of credentials in the trust chain.
    IssuerId
);
string_id!(
    /// A human user or automated caller.
    ActorId
);
string_id!(
    /// Correlates one deployment attempt with its acknowledgement.
    CorrelationId
);
string_id!(
    /// Unique identifier of an applied signature.
    SignatureId
);
string_id!(
    /// Reference returned by the archive collaborator.
    ArchiveRef
);
string_id!(
    /// Role name in the capability-set mapping.
    Role
);

generated_id!(ContractId, "contract");
generated_id!(TemplateId, "template");
generated_id!(SessionId, "session");
generated_id!(CorrelationId, "deploy");
generated_id!(SignatureId, "sig");

/// Exact template reference: id plus the immutable version used.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateRef {
    pub template_id: TemplateId,
    pub version: u32,
}

impl TemplateRef {
    pub fn new(template_id: impl Into<String>, version: u32) -> Self {
        Self {
            template_id: TemplateId::new(template_id),
            version,
        }
    }
}

impl std::fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.template_id, self.version)
    }
}

/// Entity affected by an audited action.
///
/// The [`EntityRef::key`] form is the partition key of the audit ledger's
/// secondary index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Contract(ContractId),
    Template(TemplateId),
    Session(SessionId),
    Credential(CredentialId),
    Role(Role),
    Actor(ActorId),
    Ledger,
}

impl EntityRef {
    pub fn key(&self) -> String {
        match self {
            Self::Contract(id) => format!("contract:{}", id),
            Self::Template(id) => format!("template:{}", id),
            Self::Session(id) => format!("session:{}", id),
            Self::Credential(id) => format!("credential:{}", id),
            Self::Role(role) => format!("role:{}", role),
            Self::Actor(id) => format!("actor:{}", id),
            Self::Ledger => "ledger".to_string(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
