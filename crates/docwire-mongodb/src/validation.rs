//! Field-name validation for write requests
//!
//! A write is either a full-document replacement or a set of update operators,
//! and the two shapes have mutually exclusive rules for their keys:
//!
//! - replacement documents are plain data, so `$`-prefixed keys are rejected at the top level
//! - update documents contain only operators at the top level (`$set`, `$inc`, ...),
//!   with field paths one level down
//!
//! [`ValidatorSelector`] maps a [`WriteKind`] to the matching [`FieldNameValidator`]
//! once per request, and [`validate_document`] walks a document calling it for every key.
//! [`WriteRequest::encode`] only serializes after the whole document passed.

use crate::config::{DottedKeyPolicy, FieldNamePolicy};
use bson::{Bson, Document};
use docwire_common::{DocwireError, InvalidFieldNameError, Result};
use std::fmt;

/// Prefix that marks a key as operator syntax
pub const OPERATOR_PREFIX: char = '$';

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Keys of a DBRef sub-document, the only `$` names allowed in stored data
const DBREF_KEYS: &[&str] = &["$ref", "$id", "$db"];

const UPDATE_OPERATORS: &[&str] = &[
    "$set", "$unset", "$inc", "$mul", "$rename", "$setOnInsert",
    "$min", "$max", "$currentDate", "$addToSet", "$pop", "$pull",
    "$push", "$pullAll", "$bit",
];

// Modifiers and query operators that appear inside update operator arguments,
// e.g. `{$push: {tags: {$each: [..]}}}` or `{$pull: {scores: {$gte: 6}}}`
const NESTED_OPERATORS: &[&str] = &[
    "$each", "$slice", "$sort", "$position", "$type",
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin",
    "$and", "$or", "$not", "$nor", "$exists", "$mod", "$regex", "$options",
    "$all", "$elemMatch", "$size",
];

/// Shape of a write request, fixed before it is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteKind {
    /// Kind not determined yet; validated permissively
    #[default]
    Unspecified,
    /// Partial update made of `$` operators
    FieldUpdate,
    /// Whole-document replacement
    Replacement,
}

/// Decides whether a key is legal at a given nesting depth (0 is the top level).
pub trait FieldNameValidator: Send + Sync + fmt::Debug {
    fn validate(&self, name: &str, depth: usize) -> std::result::Result<(), InvalidFieldNameError>;
}

fn is_operator_like(name: &str) -> bool {
    name.starts_with(OPERATOR_PREFIX)
}

/// Checks if the name is a known top-level update operator
pub fn is_update_operator(name: &str) -> bool {
    UPDATE_OPERATORS.contains(&name)
}

fn is_nested_operator(name: &str) -> bool {
    NESTED_OPERATORS.contains(&name) || DBREF_KEYS.contains(&name)
}

/// `$`, `$[]` and `$[identifier]` address array elements inside an update path
fn is_positional_segment(segment: &str) -> bool {
    if segment == "$" || segment == "$[]" {
        return true;
    }
    segment
        .strip_prefix("$[")
        .and_then(|rest| rest.strip_suffix(']'))
        .map(|ident| {
            ident
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase())
                && ident.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or(false)
}

fn check_length_and_nul(name: &str, depth: usize) -> std::result::Result<(), InvalidFieldNameError> {
    if name.is_empty() {
        return Err(InvalidFieldNameError::new(name, depth, "field name cannot be empty"));
    }
    if name.len() > MAX_FIELD_NAME_LENGTH {
        return Err(InvalidFieldNameError::new(
            name,
            depth,
            format!(
                "field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            ),
        ));
    }
    if name.contains('\0') {
        return Err(InvalidFieldNameError::new(
            name,
            depth,
            "field name cannot contain null bytes",
        ));
    }
    Ok(())
}

/// Ordinary rules for keys of stored documents
fn check_plain_name(
    name: &str,
    depth: usize,
    allow_dots: bool,
) -> std::result::Result<(), InvalidFieldNameError> {
    check_length_and_nul(name, depth)?;

    if is_operator_like(name) && !(depth > 0 && DBREF_KEYS.contains(&name)) {
        return Err(InvalidFieldNameError::new(
            name,
            depth,
            "field name cannot start with '$' (reserved for operators)",
        ));
    }

    if !allow_dots && name.contains('.') {
        return Err(InvalidFieldNameError::new(
            name,
            depth,
            "field name cannot contain '.' at this position",
        ));
    }

    Ok(())
}

/// Rules for the whole-document replacement shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacementValidator {
    top_level_dotted_keys: DottedKeyPolicy,
}

impl ReplacementValidator {
    pub fn new(top_level_dotted_keys: DottedKeyPolicy) -> Self {
        Self {
            top_level_dotted_keys,
        }
    }
}

impl FieldNameValidator for ReplacementValidator {
    fn validate(&self, name: &str, depth: usize) -> std::result::Result<(), InvalidFieldNameError> {
        if depth == 0 {
            if is_operator_like(name) {
                return Err(InvalidFieldNameError::new(
                    name,
                    depth,
                    "replacement documents cannot contain update operators",
                ));
            }
            return check_plain_name(name, depth, self.top_level_dotted_keys.allows_dots());
        }
        check_plain_name(name, depth, true)
    }
}

/// Rules for the `$`-operator update shape.
///
/// Names are checked without knowing which operator they sit under. Below the
/// field path (depth 2 and deeper) every modifier and query operator is
/// accepted, since `$pull` conditions such as `{$gte: 6}` live there too. A
/// query operator under `$set` (`{$set: {doc: {$gt: 5}}}`) therefore passes
/// here and is left for the server to reject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateValidator;

impl UpdateValidator {
    fn validate_operator(name: &str) -> std::result::Result<(), InvalidFieldNameError> {
        check_length_and_nul(name, 0)?;
        if !is_operator_like(name) || name.len() == 1 {
            return Err(InvalidFieldNameError::new(
                name,
                0,
                "update documents may only contain '$' operators at the top level",
            ));
        }
        if !is_update_operator(name) {
            tracing::warn!(operator = %name, "Unknown update operator");
        }
        Ok(())
    }

    fn validate_path(path: &str) -> std::result::Result<(), InvalidFieldNameError> {
        check_length_and_nul(path, 1)?;
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(InvalidFieldNameError::new(
                    path,
                    1,
                    "field path cannot contain an empty segment",
                ));
            }
            if is_operator_like(segment) && !is_positional_segment(segment) {
                return Err(InvalidFieldNameError::new(
                    path,
                    1,
                    format!("field path segment '{}' cannot start with '$'", segment),
                ));
            }
        }
        Ok(())
    }
}

impl FieldNameValidator for UpdateValidator {
    fn validate(&self, name: &str, depth: usize) -> std::result::Result<(), InvalidFieldNameError> {
        match depth {
            0 => Self::validate_operator(name),
            1 => Self::validate_path(name),
            _ if is_operator_like(name) && is_nested_operator(name) => Ok(()),
            _ => check_plain_name(name, depth, true),
        }
    }
}

/// Accepts a name if either the replacement or the update rules accept it.
///
/// Only used while the write kind is still unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackValidator {
    replacement: ReplacementValidator,
    update: UpdateValidator,
}

impl FallbackValidator {
    pub fn new(replacement: ReplacementValidator) -> Self {
        Self {
            replacement,
            update: UpdateValidator,
        }
    }
}

impl FieldNameValidator for FallbackValidator {
    fn validate(&self, name: &str, depth: usize) -> std::result::Result<(), InvalidFieldNameError> {
        match self.replacement.validate(name, depth) {
            Ok(()) => Ok(()),
            Err(replacement_err) => self.update.validate(name, depth).map_err(|update_err| {
                InvalidFieldNameError::new(
                    name,
                    depth,
                    format!(
                        "not valid as a replacement ({}) nor as an update ({})",
                        replacement_err.reason, update_err.reason
                    ),
                )
            }),
        }
    }
}

/// Maps a [`WriteKind`] to its validator.
///
/// The three validators are built once from the injected policy; `select` hands
/// out a shared reference, so it is O(1) and allocation-free per request.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorSelector {
    replacement: ReplacementValidator,
    update: UpdateValidator,
    fallback: FallbackValidator,
}

impl ValidatorSelector {
    pub fn new(policy: FieldNamePolicy) -> Self {
        let replacement = ReplacementValidator::new(policy.top_level_dotted_keys);
        Self {
            replacement,
            update: UpdateValidator,
            fallback: FallbackValidator::new(replacement),
        }
    }

    pub fn select(&self, kind: WriteKind) -> &dyn FieldNameValidator {
        match kind {
            WriteKind::Replacement => &self.replacement,
            WriteKind::FieldUpdate => &self.update,
            WriteKind::Unspecified => &self.fallback,
        }
    }
}

/// Validate every key of `document`, recursing into embedded documents and arrays.
///
/// Stops at the first rejected key.
pub fn validate_document(validator: &dyn FieldNameValidator, document: &Document) -> Result<()> {
    validate_at_depth(validator, document, 0)
}

fn validate_at_depth(
    validator: &dyn FieldNameValidator,
    document: &Document,
    depth: usize,
) -> Result<()> {
    for (key, value) in document.iter() {
        validator.validate(key, depth)?;
        validate_value(validator, value, depth + 1)?;
    }
    Ok(())
}

fn validate_value(validator: &dyn FieldNameValidator, value: &Bson, depth: usize) -> Result<()> {
    match value {
        Bson::Document(doc) => validate_at_depth(validator, doc, depth),
        // Array elements share the depth of the array's own value
        Bson::Array(items) => items
            .iter()
            .try_for_each(|item| validate_value(validator, item, depth)),
        _ => Ok(()),
    }
}

/// A write payload tagged with its kind, ready to be validated and encoded
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    kind: WriteKind,
    document: Document,
}

impl WriteRequest {
    pub fn new(kind: WriteKind, document: Document) -> Self {
        Self { kind, document }
    }

    pub fn replacement(document: Document) -> Self {
        Self::new(WriteKind::Replacement, document)
    }

    pub fn update(document: Document) -> Self {
        Self::new(WriteKind::FieldUpdate, document)
    }

    pub fn kind(&self) -> WriteKind {
        self.kind
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Check every field name against the rules for this request's kind
    pub fn validate(&self, selector: &ValidatorSelector) -> Result<()> {
        if self.kind == WriteKind::FieldUpdate && self.document.is_empty() {
            return Err(DocwireError::Validation(
                "update document must contain at least one operator".to_string(),
            ));
        }
        validate_document(selector.select(self.kind), &self.document)
    }

    /// Validate, then serialize the document to BSON bytes.
    ///
    /// Nothing is serialized unless every key passed validation.
    pub fn encode(&self, selector: &ValidatorSelector) -> Result<Vec<u8>> {
        self.validate(selector)?;
        let mut bytes = Vec::new();
        self.document.to_writer(&mut bytes)?;
        Ok(bytes)
    }
}
