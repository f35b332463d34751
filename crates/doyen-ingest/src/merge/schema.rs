//! Destination schema catalog
//!
//! The six destination relations are fixed and known in advance; this
//! catalog mirrors `migrations/` so batches can be checked (column names,
//! value types, nullability, conflict targets) before touching the store.

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    BigInt,
    Integer,
    Double,
    Text,
    Jsonb,
    Bytea,
    Timestamptz,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::BigInt => "bigint",
            ColumnType::Integer => "integer",
            ColumnType::Double => "double precision",
            ColumnType::Text => "text",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Bytea => "bytea",
            ColumnType::Timestamptz => "timestamptz",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    /// Filled by a sequence; never loaded from a batch
    pub generated: bool,
}

const fn col(name: &'static str, ty: ColumnType, nullable: bool) -> Column {
    Column {
        name,
        ty,
        nullable,
        generated: false,
    }
}

const fn serial(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::BigInt,
        nullable: false,
        generated: true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: Table,
    pub referenced_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Institution,
    Author,
    InstitutionAuthorLink,
    MeshTerm,
    MeshAnnotation,
    PaperLink,
}

const INSTITUTION_COLUMNS: &[Column] = &[
    col("identity_hash", ColumnType::BigInt, false),
    col("name", ColumnType::Text, false),
    col("identifiers", ColumnType::Jsonb, true),
];

const AUTHOR_COLUMNS: &[Column] = &[
    col("identity_hash", ColumnType::BigInt, false),
    col("first_name", ColumnType::Text, true),
    col("last_name", ColumnType::Text, false),
    col("initials", ColumnType::Text, true),
    col("suffix", ColumnType::Text, true),
    col("identifier", ColumnType::Text, true),
];

const INSTITUTION_AUTHOR_LINK_COLUMNS: &[Column] = &[
    col("institution_hash", ColumnType::BigInt, false),
    col("author_hash", ColumnType::BigInt, false),
];

const MESH_TERM_COLUMNS: &[Column] = &[
    col("mesh_id", ColumnType::BigInt, false),
    col("mesh_name", ColumnType::Text, true),
];

const MESH_ANNOTATION_COLUMNS: &[Column] = &[
    serial("id"),
    col("author_hash", ColumnType::BigInt, false),
    col("mesh_id", ColumnType::BigInt, false),
];

const PAPER_LINK_COLUMNS: &[Column] = &[
    serial("id"),
    col("paper_id", ColumnType::BigInt, false),
    col("author_hash", ColumnType::BigInt, false),
];

const AUTHOR_FK: ForeignKey = ForeignKey {
    column: "author_hash",
    references: Table::Author,
    referenced_column: "identity_hash",
};

impl Table {
    /// Merge order: every relation comes after the relations it references
    pub const ALL: [Table; 6] = [
        Table::Author,
        Table::Institution,
        Table::InstitutionAuthorLink,
        Table::MeshTerm,
        Table::MeshAnnotation,
        Table::PaperLink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Institution => "institution",
            Table::Author => "author",
            Table::InstitutionAuthorLink => "institution_author_link",
            Table::MeshTerm => "mesh_term",
            Table::MeshAnnotation => "mesh_annotation",
            Table::PaperLink => "paper_link",
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::Institution => INSTITUTION_COLUMNS,
            Table::Author => AUTHOR_COLUMNS,
            Table::InstitutionAuthorLink => INSTITUTION_AUTHOR_LINK_COLUMNS,
            Table::MeshTerm => MESH_TERM_COLUMNS,
            Table::MeshAnnotation => MESH_ANNOTATION_COLUMNS,
            Table::PaperLink => PAPER_LINK_COLUMNS,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn primary_key(self) -> &'static [&'static str] {
        match self {
            Table::Institution | Table::Author => &["identity_hash"],
            Table::InstitutionAuthorLink => &["institution_hash", "author_hash"],
            Table::MeshTerm => &["mesh_id"],
            Table::MeshAnnotation | Table::PaperLink => &["id"],
        }
    }

    /// Postgres default name of the primary key constraint
    pub fn primary_key_constraint(self) -> String {
        format!("{}_pkey", self.name())
    }

    /// Named uniqueness constraints a merge may target
    pub fn unique_constraints(self) -> Vec<String> {
        vec![self.primary_key_constraint()]
    }

    pub fn foreign_keys(self) -> &'static [ForeignKey] {
        match self {
            Table::Institution | Table::Author | Table::MeshTerm => &[],
            Table::InstitutionAuthorLink => &[
                ForeignKey {
                    column: "institution_hash",
                    references: Table::Institution,
                    referenced_column: "identity_hash",
                },
                AUTHOR_FK,
            ],
            Table::MeshAnnotation => &[
                AUTHOR_FK,
                ForeignKey {
                    column: "mesh_id",
                    references: Table::MeshTerm,
                    referenced_column: "mesh_id",
                },
            ],
            Table::PaperLink => &[AUTHOR_FK],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
