//! Persists schema versions, validates proposed schema updates against the
//! currently published version, and mints new versions by content hash.
//!
//! Grounded in the source system's `updateSchema`/`validateUpdateSchemaFields`
//! validation chain: every rule below fails fast on the first violation, in
//! the same order the rules are documented.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::error::{CResult, Error};
use crate::key::{Key, KeyPrefix};
use crate::mvcc::Transaction;
use crate::schema::{CrdtKind, FieldDescription, FieldKind, RelationType, SchemaDescription, KEY_FIELD_NAME};
use crate::storage::engine::Engine;

fn encode_cbor<T: serde::Serialize>(value: &T) -> CResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CResult<T> {
    ciborium::from_reader(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

fn content_hash(name: &str, fields: &[FieldDescription]) -> CResult<String> {
    let buf = encode_cbor(&(name, fields))?;
    let digest = Sha256::digest(&buf);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Mints a new schema version: computes its content-derived `version_id`,
/// defaults `root` to it when unset, and persists the version plus its
/// root index entry.
pub fn create_schema_version<E: Engine>(
    txn: &Transaction<E>,
    mut schema: SchemaDescription,
) -> CResult<SchemaDescription> {
    if schema.name.is_empty() {
        return Err(Error::SchemaNameEmpty);
    }
    let version_id = content_hash(&schema.name, &schema.fields)?;
    schema.version_id = version_id.clone();
    if schema.root.is_empty() {
        schema.root = version_id.clone();
    }

    txn.set(&Key::SchemaVersion(version_id.clone()).encode(), encode_cbor(&schema)?)?;
    txn.set(&Key::SchemaRoot(schema.root.clone(), version_id).encode(), vec![1])?;
    Ok(schema)
}

pub fn get_schema_version<E: Engine>(
    txn: &Transaction<E>,
    version_id: &str,
) -> CResult<Option<SchemaDescription>> {
    match txn.get(&Key::SchemaVersion(version_id.to_string()).encode())? {
        Some(bytes) => Ok(Some(decode_cbor(&bytes)?)),
        None => Ok(None),
    }
}

/// All version ids ever published under `root`, in storage order.
pub fn get_versions_by_root<E: Engine>(txn: &Transaction<E>, root: &str) -> CResult<Vec<String>> {
    let mut out = Vec::new();
    for item in txn.scan_prefix(&KeyPrefix::SchemaRoot(root.to_string()).encode())? {
        let (key, _) = item?;
        if let Key::SchemaRoot(_, vid) = Key::decode(&key)? {
            out.push(vid);
        }
    }
    Ok(out)
}

/// Validates a proposed schema update against the currently published
/// version, returning `true` iff at least one field was newly introduced.
/// Related schemas (for foreign-object field validation) are looked up by
/// name in `proposed_by_name`.
pub fn validate_update(
    existing_by_name: &HashMap<String, SchemaDescription>,
    proposed_by_name: &HashMap<String, SchemaDescription>,
    proposed: &SchemaDescription,
) -> CResult<bool> {
    if proposed.name.is_empty() {
        return Err(Error::SchemaNameEmpty);
    }
    let existing = existing_by_name
        .get(&proposed.name)
        .ok_or_else(|| Error::CollectionNotFound(proposed.name.clone()))?;

    if proposed.root != existing.root {
        return Err(Error::SchemaRootMismatch {
            expected: existing.root.clone(),
            actual: proposed.root.clone(),
        });
    }
    if !proposed.version_id.is_empty() && proposed.version_id != existing.version_id {
        return Err(Error::SchemaRootMismatch {
            expected: existing.version_id.clone(),
            actual: proposed.version_id.clone(),
        });
    }

    let mut changed = false;
    let mut seen_names = HashSet::new();
    let mut seen_existing_ids = HashSet::new();

    for (p, field) in proposed.fields.iter().enumerate() {
        if !seen_names.insert(field.name.clone()) {
            return Err(Error::DuplicateField(field.name.clone()));
        }

        if field.id == 0 {
            if field.name == KEY_FIELD_NAME {
                seen_existing_ids.insert(0);
                continue;
            }
            changed = true;
            validate_new_relation_field(proposed, proposed_by_name, field)?;
            continue;
        }

        let (existing_index, existing_field) = existing
            .fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.id == field.id)
            .ok_or_else(|| Error::CannotSetFieldID(field.name.clone()))?;

        if existing_field != field {
            return Err(Error::CannotMutateField(field.name.clone()));
        }
        if existing_index != p {
            return Err(Error::CannotMoveField(field.name.clone()));
        }
        if !matches!(field.crdt_type, CrdtKind::NoneCrdt | CrdtKind::LwwRegister) {
            return Err(Error::UnknownCRDT(field.name.clone()));
        }
        seen_existing_ids.insert(field.id);
    }

    for existing_field in &existing.fields {
        if existing_field.name != KEY_FIELD_NAME && !seen_existing_ids.contains(&existing_field.id)
        {
            return Err(Error::CannotDeleteField(existing_field.name.clone()));
        }
    }

    Ok(changed)
}

fn validate_new_relation_field(
    proposed: &SchemaDescription,
    proposed_by_name: &HashMap<String, SchemaDescription>,
    field: &FieldDescription,
) -> CResult<()> {
    if !matches!(field.kind, FieldKind::ForeignObject | FieldKind::ForeignObjectArray) {
        return Ok(());
    }

    let schema_name = field
        .schema
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::RelationalFieldMissingSchema(field.name.clone()))?;
    let related = proposed_by_name
        .get(schema_name)
        .ok_or_else(|| Error::RelationalFieldMissingSchema(field.name.clone()))?;

    let relation_name = field
        .relation_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::RelationalFieldMissingRelationName(field.name.clone()))?;

    match field.kind {
        FieldKind::ForeignObject => {
            let one_one = field.relation_type.contains(RelationType::ONE_ONE);
            let one_many = field.relation_type.contains(RelationType::ONE_MANY);
            if !field.relation_type.contains(RelationType::ONE) || one_one == one_many {
                return Err(Error::RelationalFieldInvalidRelationType(field.name.clone()));
            }
        }
        FieldKind::ForeignObjectArray => {
            if !field.relation_type.contains(RelationType::MANY)
                || !field.relation_type.contains(RelationType::ONE_MANY)
            {
                return Err(Error::RelationalFieldInvalidRelationType(field.name.clone()));
            }
            if field.relation_type.contains(RelationType::PRIMARY) {
                return Err(Error::PrimarySideOnMany(field.name.clone()));
            }
        }
        _ => unreachable!(),
    }

    if let Some(companion) = proposed.field_by_name(&format!("{}_id", field.name)) {
        let companion_ok = companion.kind == FieldKind::DocKey
            && companion.relation_type.contains(RelationType::INTERNAL_ID)
            && companion.relation_name.as_deref() == Some(relation_name);
        if !companion_ok {
            return Err(Error::RelatedFieldKindMismatch(companion.name.clone()));
        }
    }

    let partners: Vec<&FieldDescription> = related
        .fields
        .iter()
        .filter(|f| {
            f.relation_name.as_deref() == Some(relation_name)
                && !f.relation_type.contains(RelationType::INTERNAL_ID)
                && !(related.name == proposed.name && f.name == field.name)
        })
        .collect();
    if partners.len() != 1 {
        return Err(Error::RelationalFieldInvalidRelationType(field.name.clone()));
    }
    let partner = partners[0];

    let self_primary = field.relation_type.contains(RelationType::PRIMARY);
    let partner_primary = partner.relation_type.contains(RelationType::PRIMARY);
    if self_primary && partner_primary {
        return Err(Error::BothSidesPrimary(relation_name.to_string()));
    }
    if !self_primary && !partner_primary {
        return Err(Error::PrimarySideNotDefined(relation_name.to_string()));
    }

    if field.relation_type.contains(RelationType::ONE_ONE)
        && (partner.kind != FieldKind::ForeignObject
            || !partner.relation_type.contains(RelationType::ONE_ONE))
    {
        return Err(Error::RelatedFieldKindMismatch(field.name.clone()));
    }
    if field.kind == FieldKind::ForeignObject
        && field.relation_type.contains(RelationType::ONE_MANY)
        && partner.kind != FieldKind::ForeignObjectArray
    {
        return Err(Error::RelatedFieldKindMismatch(field.name.clone()));
    }

    Ok(())
}

/// Appends a synthetic `<name>_id` internal-id field for every new
/// relation-type-ONE field that doesn't already have an explicit companion.
fn append_synthetic_id_fields(mut proposed: SchemaDescription) -> SchemaDescription {
    let mut to_add = Vec::new();
    for field in &proposed.fields {
        if field.id != 0 || field.kind != FieldKind::ForeignObject {
            continue;
        }
        if !field.relation_type.contains(RelationType::ONE) {
            continue;
        }
        let companion_name = format!("{}_id", field.name);
        if proposed.field_by_name(&companion_name).is_some() {
            continue;
        }
        to_add.push(FieldDescription {
            id: 0,
            name: companion_name,
            kind: FieldKind::DocKey,
            crdt_type: CrdtKind::LwwRegister,
            relation_type: RelationType::INTERNAL_ID,
            relation_name: field.relation_name.clone(),
            schema: None,
        });
    }
    proposed.fields.extend(to_add);
    proposed
}

/// Validates, fills in synthetic companion fields, assigns ids to new
/// fields, and mints the new version if anything changed. Returns the
/// schema to use going forward (existing if unchanged, newly minted
/// otherwise) and whether it changed.
pub fn update_schema<E: Engine>(
    txn: &Transaction<E>,
    existing_by_name: &HashMap<String, SchemaDescription>,
    proposed_by_name: &HashMap<String, SchemaDescription>,
    proposed: SchemaDescription,
) -> CResult<(SchemaDescription, bool)> {
    let changed = validate_update(existing_by_name, proposed_by_name, &proposed)?;
    let existing = &existing_by_name[&proposed.name];
    if !changed {
        return Ok((existing.clone(), false));
    }

    let mut proposed = append_synthetic_id_fields(proposed);
    let mut next_id = existing.fields.iter().map(|f| f.id).max().unwrap_or(0) + 1;
    for field in proposed.fields.iter_mut() {
        if field.id == 0 && field.name != KEY_FIELD_NAME {
            field.id = next_id;
            next_id += 1;
        }
    }

    let saved = create_schema_version(txn, proposed)?;
    Ok((saved, true))
}
