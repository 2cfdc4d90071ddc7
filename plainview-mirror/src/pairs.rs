//! Declarative configuration of encrypted-table / mirror-table pairs.
//!
//! A pair binds one encrypted table to one mirror table, declares the
//! mirror's plaintext columns, and carries the projector that turns
//! decrypted JSON into column values. Pairs are built at startup and
//! read-only afterwards.

use crate::error::{MirrorError, MirrorResult};
use plainview_store::SqlValue;
use std::sync::Arc;

/// Columns every encrypted table and every mirror table carry implicitly.
pub const IMPLICIT_COLUMNS: &[&str] = &["id", "user_id", "bucket_id", "updated_at", "stale"];

/// One declared plaintext column on a mirror table.
#[derive(Clone, Debug)]
pub struct MirrorColumn {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

impl MirrorColumn {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, "VARCHAR")
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, "BOOLEAN")
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, "BIGINT")
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, "DOUBLE")
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// SQL default expression, rendered verbatim into the DDL.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Projector from decrypted JSON to declared column values.
pub type ProjectFn =
    Arc<dyn Fn(&serde_json::Value) -> MirrorResult<Vec<(String, SqlValue)>> + Send + Sync>;

/// Serializer from a plaintext object to the bytes that get encrypted.
pub type SerializeFn = Arc<dyn Fn(&serde_json::Value) -> MirrorResult<Vec<u8>> + Send + Sync>;

/// Binding of one encrypted table to one mirror table.
#[derive(Clone)]
pub struct MirrorPair {
    pub encrypted_table: String,
    pub mirror_table: String,
    pub columns: Vec<MirrorColumn>,
    /// AAD bound into every row envelope for this pair.
    pub default_aad: String,
    /// Extra mirror-table indexes as (index name, column list).
    pub extra_indexes: Vec<(String, Vec<String>)>,
    parse_plain: ProjectFn,
    serialize_plain: Option<SerializeFn>,
}

impl std::fmt::Debug for MirrorPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorPair")
            .field("encrypted_table", &self.encrypted_table)
            .field("mirror_table", &self.mirror_table)
            .field("columns", &self.columns)
            .field("default_aad", &self.default_aad)
            .field("extra_indexes", &self.extra_indexes)
            .finish_non_exhaustive()
    }
}

impl MirrorPair {
    /// Builds a pair with the default AAD (`pair:<encrypted_table>`) and a
    /// projector that looks each declared column up by name in the JSON
    /// object.
    pub fn new(
        encrypted_table: impl Into<String>,
        mirror_table: impl Into<String>,
        columns: Vec<MirrorColumn>,
    ) -> MirrorResult<Self> {
        let encrypted_table = encrypted_table.into();
        let mirror_table = mirror_table.into();

        validate_identifier("encrypted table", &encrypted_table)?;
        validate_identifier("mirror table", &mirror_table)?;
        for column in &columns {
            validate_identifier("column", &column.name)?;
            if IMPLICIT_COLUMNS.contains(&column.name.as_str()) {
                return Err(MirrorError::Config(format!(
                    "column {} is implicit and cannot be declared",
                    column.name
                )));
            }
        }

        let default_aad = format!("pair:{encrypted_table}");
        let projector = default_projector(columns.clone());

        Ok(Self {
            encrypted_table,
            mirror_table,
            columns,
            default_aad,
            extra_indexes: Vec::new(),
            parse_plain: projector,
            serialize_plain: None,
        })
    }

    pub fn with_aad(mut self, aad: impl Into<String>) -> Self {
        self.default_aad = aad.into();
        self
    }

    pub fn with_parse_plain(mut self, f: ProjectFn) -> Self {
        self.parse_plain = f;
        self
    }

    pub fn with_serialize_plain(mut self, f: SerializeFn) -> Self {
        self.serialize_plain = Some(f);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, columns: Vec<String>) -> Self {
        self.extra_indexes.push((name.into(), columns));
        self
    }

    /// Serializes a plaintext object to the bytes that get encrypted.
    pub fn serialize(&self, plain: &serde_json::Value) -> MirrorResult<Vec<u8>> {
        match &self.serialize_plain {
            Some(f) => f(plain),
            None => Ok(serde_json::to_vec(plain)?),
        }
    }

    /// Projects a plaintext object to declared-column values, rejecting
    /// names that are not declared on this pair.
    pub fn project(&self, plain: &serde_json::Value) -> MirrorResult<Vec<(String, SqlValue)>> {
        let values = (self.parse_plain)(plain)?;
        for (name, _) in &values {
            if !self.columns.iter().any(|c| &c.name == name) {
                return Err(MirrorError::Projection(format!(
                    "projector produced undeclared column: {name}"
                )));
            }
        }
        Ok(values)
    }
}

/// Looks each declared column up by name in the JSON object.
fn default_projector(columns: Vec<MirrorColumn>) -> ProjectFn {
    Arc::new(move |plain| {
        let object = plain
            .as_object()
            .ok_or_else(|| MirrorError::Projection("plaintext is not a JSON object".to_string()))?;

        let mut values = Vec::with_capacity(columns.len());
        for column in &columns {
            let value = match object.get(&column.name) {
                Some(v) => json_to_sql(&column.name, v)?,
                None if column.nullable || column.default.is_some() => SqlValue::Null,
                None => {
                    return Err(MirrorError::Projection(format!(
                        "missing required field: {}",
                        column.name
                    )));
                }
            };
            values.push((column.name.clone(), value));
        }
        Ok(values)
    })
}

fn json_to_sql(name: &str, value: &serde_json::Value) -> MirrorResult<SqlValue> {
    Ok(match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                return Err(MirrorError::Projection(format!(
                    "field {name} has an unrepresentable number"
                )));
            }
        }
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => {
            return Err(MirrorError::Projection(format!(
                "field {name} has unsupported type: {other}"
            )));
        }
    })
}

/// SQL identifiers are assembled into statements directly, so reject
/// anything but `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn validate_identifier(what: &str, name: &str) -> MirrorResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MirrorError::Config(format!(
            "invalid {what} identifier: {name:?}"
        )))
    }
}
