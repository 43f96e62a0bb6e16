//! Read-only catalog queries used for schema introspection.
//! information_schema columns are domain-typed, so every output is cast to a base type.

/// Base tables with their columns, excluding system schemas.
pub const TABLES_WITH_COLUMNS: &str = r#"
SELECT
    t.table_schema::text           AS table_schema,
    t.table_name::text             AS table_name,
    c.column_name::text            AS column_name,
    c.data_type::text              AS data_type,
    c.is_nullable::text            AS is_nullable,
    c.column_default::text         AS column_default,
    c.character_maximum_length::int4 AS character_maximum_length,
    c.numeric_precision::int4      AS numeric_precision,
    c.numeric_scale::int4          AS numeric_scale
FROM information_schema.tables t
LEFT JOIN information_schema.columns c
    ON t.table_name = c.table_name
   AND t.table_schema = c.table_schema
WHERE t.table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
  AND t.table_type = 'BASE TABLE'
ORDER BY t.table_schema, t.table_name, c.ordinal_position
"#;

/// Views with their columns, excluding system schemas.
pub const VIEWS_WITH_COLUMNS: &str = r#"
SELECT
    v.table_schema::text           AS table_schema,
    v.table_name::text             AS table_name,
    c.column_name::text            AS column_name,
    c.data_type::text              AS data_type,
    c.is_nullable::text            AS is_nullable,
    c.column_default::text         AS column_default,
    c.character_maximum_length::int4 AS character_maximum_length,
    c.numeric_precision::int4      AS numeric_precision,
    c.numeric_scale::int4          AS numeric_scale
FROM information_schema.views v
LEFT JOIN information_schema.columns c
    ON v.table_name = c.table_name
   AND v.table_schema = c.table_schema
WHERE v.table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
ORDER BY v.table_schema, v.table_name, c.ordinal_position
"#;
