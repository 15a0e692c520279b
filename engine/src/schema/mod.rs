//! Schema descriptions: the shape of a document type, and the bidirectional
//! relation metadata that binds two schemas together.

pub mod registry;

use serde_derive::{Deserialize, Serialize};

/// The sentinel field name used for the implicit document key field.
pub const KEY_FIELD_NAME: &str = "_key";

/// A versioned, immutable-once-published description of a document shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    /// Unique human identifier.
    pub name: String,
    /// Stable across versions sharing the same logical schema.
    pub root: String,
    /// Changes on every edit.
    pub version_id: String,
    pub fields: Vec<FieldDescription>,
}

impl SchemaDescription {
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Primitive,
    DocKey,
    ForeignObject,
    ForeignObjectArray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtKind {
    NoneCrdt,
    LwwRegister,
}

impl Default for CrdtKind {
    fn default() -> Self {
        CrdtKind::LwwRegister
    }
}

/// Bitset of relation roles a field can carry. A plain primitive field
/// carries an empty `RelationType`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationType(u8);

impl RelationType {
    pub const NONE: RelationType = RelationType(0);
    pub const ONE: RelationType = RelationType(1 << 0);
    pub const MANY: RelationType = RelationType(1 << 1);
    pub const ONE_ONE: RelationType = RelationType(1 << 2);
    pub const ONE_MANY: RelationType = RelationType(1 << 3);
    pub const PRIMARY: RelationType = RelationType(1 << 4);
    pub const INTERNAL_ID: RelationType = RelationType(1 << 5);

    pub fn contains(self, other: RelationType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: RelationType) -> RelationType {
        RelationType(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for RelationType {
    type Output = RelationType;
    fn bitor(self, rhs: RelationType) -> RelationType {
        self.union(rhs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    /// Assigned by the registry; never zero except for the `_key` sentinel.
    pub id: u32,
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub crdt_type: CrdtKind,
    #[serde(default)]
    pub relation_type: RelationType,
    #[serde(default)]
    pub relation_name: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
}

impl FieldDescription {
    pub fn primitive(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: FieldKind::Primitive,
            crdt_type: CrdtKind::LwwRegister,
            relation_type: RelationType::NONE,
            relation_name: None,
            schema: None,
        }
    }

    pub fn is_secondary_id_of(&self, relation_name: &str) -> bool {
        self.kind == FieldKind::DocKey
            && self.relation_type.contains(RelationType::INTERNAL_ID)
            && self.relation_name.as_deref() == Some(relation_name)
    }
}
