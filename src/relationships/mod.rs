//! Relationship Inference Engine
//!
//! Combines declared foreign keys with a naming-convention pass: a column
//! `<stem>_id` of an identifier-compatible type is taken to reference the table
//! named by the stem, its plural or its singular.
//!
//! # Output order
//! 1. Declared foreign keys of the table (outbound), in catalog order
//! 2. Declared foreign keys of other tables pointing at it (inbound)
//! 3. Implied relationships, sorted by source table, source column, match rank
//!    (exact stem first), target table
//!
//! Implied entries are recomputed on every call and never cached.

pub mod inflection;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::{ForeignKeyInfo, TableInfo};
use crate::error::{ExplorerError, Result};
use crate::introspect;
use crate::pool::ConnectionPool;
use inflection::MatchKind;

/// Where a relationship comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Foreign key in catalog metadata
    Declared,
    /// Inferred from column naming
    Implied,
}

/// Direction relative to the table that was asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The table references another table
    Outbound,
    /// Another table references the table
    Inbound,
}

/// One column-to-column relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredRelationship {
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
    pub confidence: Confidence,
    pub direction: Direction,
    /// More than one table matched the column stem
    #[serde(default)]
    pub ambiguous: bool,
    /// Constraint name of declared relationships
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_name: Option<String>,
}

/// Declared and implied relationships of `schema.table`
///
/// Fails `SchemaNotFound` when the schema is absent and `TableNotFound` when the
/// table is not among the schema's tables.
pub async fn find_relationships(
    pool: &Arc<ConnectionPool>,
    schema: &str,
    table: &str,
) -> Result<Vec<InferredRelationship>> {
    let foreign_keys = introspect::list_schema_foreign_keys(pool, schema).await?;
    let tables = introspect::list_tables(pool, schema).await?;

    if !tables.iter().any(|t| t.name == table) {
        return Err(ExplorerError::table_not_found(pool.database(), schema, table));
    }

    let relationships = infer_relationships(schema, table, &tables, &foreign_keys);
    tracing::debug!(
        database = %pool.database(),
        schema,
        table,
        found = relationships.len(),
        "inferred relationships"
    );
    Ok(relationships)
}

/// Pure inference over already-fetched catalog data
///
/// `tables` is every table of `schema`, `foreign_keys` every declared foreign key
/// whose source table is in `schema`. Returns nothing when `table` is unknown.
#[must_use]
pub fn infer_relationships(
    schema: &str,
    table: &str,
    tables: &[TableInfo],
    foreign_keys: &[ForeignKeyInfo],
) -> Vec<InferredRelationship> {
    let Some(subject) = tables.iter().find(|t| t.name == table) else {
        return Vec::new();
    };

    let mut out = Vec::new();

    for fk in foreign_keys.iter().filter(|fk| fk.table == table) {
        out.extend(declared(fk, Direction::Outbound));
    }
    for fk in foreign_keys
        .iter()
        .filter(|fk| fk.table != table && fk.referenced_table == table && fk.referenced_schema == schema)
    {
        out.extend(declared(fk, Direction::Inbound));
    }

    let covered: HashSet<(&str, &str)> = foreign_keys
        .iter()
        .flat_map(|fk| fk.columns.iter().map(move |c| (fk.table.as_str(), c.as_str())))
        .collect();

    let mut implied: Vec<(InferredRelationship, MatchKind)> = Vec::new();
    for candidate in implied_from(subject, tables, &covered) {
        implied.push((candidate.to_relationship(schema, Direction::Outbound), candidate.kind));
    }
    for other in tables.iter().filter(|t| t.name != table) {
        for candidate in implied_from(other, tables, &covered) {
            if candidate.target.name == table {
                implied.push((candidate.to_relationship(schema, Direction::Inbound), candidate.kind));
            }
        }
    }

    implied.sort_by(|(a, a_kind), (b, b_kind)| {
        (a.source_table.as_str(), a.source_column.as_str(), a_kind, a.target_table.as_str()).cmp(&(
            b.source_table.as_str(),
            b.source_column.as_str(),
            b_kind,
            b.target_table.as_str(),
        ))
    });
    out.extend(implied.into_iter().map(|(relationship, _)| relationship));

    // Declared entries come first, so they win over any implied duplicate
    let mut seen = HashSet::new();
    out.retain(|r| seen.insert((r.source_table.clone(), r.source_column.clone(), r.target_table.clone())));
    out
}

fn declared(fk: &ForeignKeyInfo, direction: Direction) -> impl Iterator<Item = InferredRelationship> + '_ {
    fk.columns.iter().zip(&fk.referenced_columns).map(move |(column, referenced)| InferredRelationship {
        source_schema: fk.schema.clone(),
        source_table: fk.table.clone(),
        source_column: column.clone(),
        target_schema: fk.referenced_schema.clone(),
        target_table: fk.referenced_table.clone(),
        target_column: referenced.clone(),
        confidence: Confidence::Declared,
        direction,
        ambiguous: false,
        constraint_name: Some(fk.name.clone()),
    })
}

struct Candidate<'a> {
    source: &'a TableInfo,
    column: &'a str,
    target: &'a TableInfo,
    kind: MatchKind,
    ambiguous: bool,
}

impl Candidate<'_> {
    fn to_relationship(&self, schema: &str, direction: Direction) -> InferredRelationship {
        let target_column = match self.target.primary_key.as_slice() {
            [single] => single.clone(),
            _ => "id".to_string(),
        };
        InferredRelationship {
            source_schema: schema.to_string(),
            source_table: self.source.name.clone(),
            source_column: self.column.to_string(),
            target_schema: schema.to_string(),
            target_table: self.target.name.clone(),
            target_column,
            confidence: Confidence::Implied,
            direction,
            ambiguous: self.ambiguous,
            constraint_name: None,
        }
    }
}

/// Implied targets of every eligible `_id` column of `source`
fn implied_from<'a>(
    source: &'a TableInfo,
    tables: &'a [TableInfo],
    covered: &HashSet<(&str, &str)>,
) -> Vec<Candidate<'a>> {
    let mut out = Vec::new();
    for column in &source.columns {
        let Some(stem) = id_stem(&column.name) else {
            continue;
        };
        if !is_identifier_type(&column.data_type)
            || covered.contains(&(source.name.as_str(), column.name.as_str()))
        {
            continue;
        }

        let mut targets: Vec<(&TableInfo, MatchKind)> = Vec::new();
        for (name, kind) in inflection::candidate_names(stem) {
            for table in tables {
                let is_self = table.name == source.name;
                let already = targets.iter().any(|(t, _)| t.name == table.name);
                if !is_self && !already && table.name.to_lowercase() == name {
                    targets.push((table, kind));
                }
            }
        }

        let ambiguous = targets.len() > 1;
        out.extend(targets.into_iter().map(|(target, kind)| Candidate {
            source,
            column: &column.name,
            target,
            kind,
            ambiguous,
        }));
    }
    out
}

/// Stem of a `<stem>_id` column name (case-insensitive suffix, non-empty stem)
#[must_use]
pub fn id_stem(column: &str) -> Option<&str> {
    let split = column.len().checked_sub(3)?;
    if split == 0 || !column.is_char_boundary(split) {
        return None;
    }
    let (stem, suffix) = column.split_at(split);
    suffix.eq_ignore_ascii_case("_id").then_some(stem)
}

/// Whether a declared column type can hold a row identifier
///
/// Integer types, `uuid`, scale-less `numeric`/`decimal` and character types.
/// Case and parenthesised lengths are ignored. An empty type (a `SQLite`
/// column declared without one) can hold anything and is accepted.
#[must_use]
pub fn is_identifier_type(data_type: &str) -> bool {
    let lower = data_type.trim().to_lowercase();
    let (base, args) = match lower.split_once('(') {
        Some((base, rest)) => (base.trim(), rest.split(')').next().unwrap_or("")),
        None => (lower.as_str(), ""),
    };

    match base {
        "" => true,
        "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "tinyint"
        | "mediumint" | "serial" | "smallserial" | "bigserial" | "serial2" | "serial4"
        | "serial8" | "uuid" | "char" | "character" | "varchar" | "character varying" | "bpchar"
        | "text" | "nvarchar" => true,
        "numeric" | "decimal" => args.split(',').nth(1).map_or(true, |scale| scale.trim() == "0"),
        _ => false,
    }
}
