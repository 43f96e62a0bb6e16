//! Canonical text form of a `SchemaSnapshot`.
//!
//! This text is the only schema context given to the model, so it must be a
//! pure function of the snapshot: no timestamps, no connection details.

use crate::db::models::{ColumnDef, SchemaSnapshot, TableDef};

const INDENT: &str = "    ";

pub fn render_schema(snapshot: &SchemaSnapshot) -> String {
    let mut lines: Vec<String> = Vec::new();

    if !snapshot.tables.is_empty() {
        lines.push("-- TABLES".to_string());
        for table in &snapshot.tables {
            push_block(&mut lines, "TABLE", table, table_column);
        }
    }

    if !snapshot.views.is_empty() {
        lines.push("\n-- VIEWS".to_string());
        for view in &snapshot.views {
            push_block(&mut lines, "VIEW", view, view_column);
        }
    }

    lines.join("\n")
}

fn push_block(
    lines: &mut Vec<String>,
    keyword: &str,
    relation: &TableDef,
    column: fn(&ColumnDef) -> String,
) {
    lines.push(format!(
        "\n{keyword} {}.{} (",
        relation.schema_name, relation.table_name
    ));
    let columns: Vec<String> = relation.columns.iter().map(column).collect();
    lines.push(columns.join(",\n"));
    lines.push(");".to_string());
}

fn table_column(col: &ColumnDef) -> String {
    let mut def = format!("{INDENT}{} {}", col.name, col.data_type.to_uppercase());
    def.push_str(&dimension(col));
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(expr) = col.default_expr.as_deref().filter(|e| !e.is_empty()) {
        def.push_str(" DEFAULT ");
        def.push_str(expr);
    }
    def
}

fn view_column(col: &ColumnDef) -> String {
    format!("{INDENT}{} {}", col.name, col.data_type.to_uppercase())
}

/// `(length)`, else `(precision,scale)`, else `(precision)`. Zero counts as absent.
fn dimension(col: &ColumnDef) -> String {
    let length = col.length.filter(|&l| l != 0);
    let precision = col.precision.filter(|&p| p != 0);
    match (length, precision, col.scale) {
        (Some(l), _, _) => format!("({l})"),
        (None, Some(p), Some(s)) => format!("({p},{s})"),
        (None, Some(p), None) => format!("({p})"),
        (None, None, _) => String::new(),
    }
}
