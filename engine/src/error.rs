//! Closed error taxonomy for the collection engine.

/// Convenience alias used throughout the crate.
pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("schema name must not be empty")]
    SchemaNameEmpty,

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("schema root mismatch: expected {expected}, got {actual}")]
    SchemaRootMismatch { expected: String, actual: String },

    #[error("cannot set field id on field {0}, ids are assigned by the registry")]
    CannotSetFieldID(String),

    #[error("cannot mutate existing field {0}")]
    CannotMutateField(String),

    #[error("cannot move existing field {0}")]
    CannotMoveField(String),

    #[error("cannot delete existing field {0}")]
    CannotDeleteField(String),

    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    #[error("relational field {0} is missing a schema reference")]
    RelationalFieldMissingSchema(String),

    #[error("relational field {0} is missing a relation name")]
    RelationalFieldMissingRelationName(String),

    #[error("relational field {0} has an invalid relation type")]
    RelationalFieldInvalidRelationType(String),

    #[error("related field kind mismatch on {0}")]
    RelatedFieldKindMismatch(String),

    #[error("primary side of a one-many relation must be on the many side's companion field, not {0}")]
    PrimarySideOnMany(String),

    #[error("neither side of relation {0} declares the primary side")]
    PrimarySideNotDefined(String),

    #[error("both sides of relation {0} declare themselves primary")]
    BothSidesPrimary(String),

    #[error("one-one relation already has a linked document for {0}")]
    OneOneAlreadyLinked(String),

    #[error("document already exists: {0}")]
    DocumentAlreadyExists(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("document has been deleted: {0}")]
    DocumentDeleted(String),

    #[error("document signature/CID verification failed for {0}")]
    DocVerification(String),

    #[error("field does not exist on collection: {0}")]
    FieldNotExist(String),

    #[error("value type mismatch for field {field}: expected {expected}, got {actual}")]
    ValueTypeMismatch { field: String, expected: String, actual: String },

    #[error("unknown CRDT type: {0}")]
    UnknownCRDT(String),

    #[error("serialization error: {0}")]
    Encoding(String),

    #[error("content addressing error: {0}")]
    Cid(String),

    #[error("storage engine error: {0}")]
    Store(String),

    #[error("write/write conflict, transaction must be retried")]
    StoreConflict,

    #[error("transaction is read-only")]
    ReadOnly,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(err.to_string())
    }
}
