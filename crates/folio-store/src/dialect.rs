//! SQL rendering of the statement IR.
//!
//! Used to emit rehydration scripts that an operator can run directly against
//! a MySQL server after a restart. Identifiers are always backtick-quoted and
//! literals escaped, so no field name or value can change the statement shape.

use crate::ddl::{ColumnSpec, ColumnType, Engine, TableDef};
use crate::statement::{JoinKind, Predicate, Procedure, Projection, Select, Statement};
use crate::value::Value;

/// Renders statements into one SQL dialect.
pub trait Dialect {
    fn render(&self, statement: &Statement) -> String;

    /// Render every step of a procedure, one statement per line.
    fn render_procedure(&self, procedure: &Procedure) -> String {
        let mut out = String::new();
        for step in &procedure.steps {
            out.push_str(&self.render(step));
            out.push_str(";\n");
        }
        out
    }
}

/// MySQL / MariaDB rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

fn ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('\'');
            for c in s.chars() {
                match c {
                    '\'' => out.push_str("''"),
                    '\\' => out.push_str("\\\\"),
                    '\0' => out.push_str("\\0"),
                    other => out.push(other),
                }
            }
            out.push('\'');
            out
        }
    }
}

fn column_type(ty: ColumnType) -> String {
    match ty {
        ColumnType::UInt8 => "TINYINT UNSIGNED".into(),
        ColumnType::UInt16 => "SMALLINT UNSIGNED".into(),
        ColumnType::UInt24 => "MEDIUMINT UNSIGNED".into(),
        ColumnType::UInt32 => "INT UNSIGNED".into(),
        ColumnType::Int => "INT".into(),
        ColumnType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
        ColumnType::Varchar(n) => format!("VARCHAR({n})"),
    }
}

fn column_def(column: &ColumnSpec) -> String {
    let mut out = format!("{} {}", ident(&column.name), column_type(column.ty));
    if column.primary_key {
        out.push_str(" PRIMARY KEY");
    }
    out
}

fn create_table(def: &TableDef) -> String {
    let mut parts: Vec<String> = def.columns.iter().map(column_def).collect();
    for index in &def.indexes {
        let cols: Vec<String> = index
            .columns
            .iter()
            .map(|c| match index.prefix_len {
                Some(len) => format!("{}({len})", ident(c)),
                None => ident(c),
            })
            .collect();
        parts.push(format!("INDEX ({})", cols.join(", ")));
    }
    let engine = match def.engine {
        Engine::Durable => "MYISAM",
        Engine::Volatile => "MEMORY",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE={engine}",
        ident(&def.name),
        parts.join(", ")
    )
}

fn predicate(p: &Predicate) -> String {
    match p {
        Predicate::Eq { column, value } => format!("{} = {}", ident(column), literal(value)),
        Predicate::Gt { column, value } => format!("{} > {}", ident(column), literal(value)),
        Predicate::IsNull { column } => format!("{} IS NULL", ident(column)),
    }
}

fn where_clause(filter: &[Predicate]) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filter.iter().map(predicate).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

impl MySql {
    fn projection(&self, p: &Projection, select: &Select) -> String {
        match p {
            Projection::Column { name } => ident(name),
            Projection::Count { alias } => format!("COUNT(*) AS {}", ident(alias)),
            Projection::CountDistinct { column, alias } => {
                format!("COUNT(DISTINCT {}) AS {}", ident(column), ident(alias))
            }
            Projection::Min { column, alias } => {
                format!("MIN({}) AS {}", ident(column), ident(alias))
            }
            Projection::Max { column, alias } => {
                format!("MAX({}) AS {}", ident(column), ident(alias))
            }
            Projection::MaxCharLength { column, alias } => {
                format!("MAX(CHAR_LENGTH({})) AS {}", ident(column), ident(alias))
            }
            Projection::Sequence {
                alias,
                table,
                column,
            } => {
                let order = if select.order_by.is_empty() {
                    String::new()
                } else {
                    format!(" ORDER BY {}", self.order_list(select))
                };
                format!(
                    "(SELECT COALESCE(MAX({c}) + 1, 0) FROM {t}) + ROW_NUMBER() OVER ({order}) - 1 AS {a}",
                    c = ident(column),
                    t = ident(table),
                    order = order.trim_start(),
                    a = ident(alias),
                )
            }
        }
    }

    fn order_list(&self, select: &Select) -> String {
        select
            .order_by
            .iter()
            .map(|o| {
                if o.descending {
                    format!("{} DESC", ident(&o.column))
                } else {
                    ident(&o.column)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn select(&self, select: &Select) -> String {
        let columns = if select.projection.is_empty() {
            "*".to_string()
        } else {
            select
                .projection
                .iter()
                .map(|p| self.projection(p, select))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}", ident(&select.from));
        let mut anti = Vec::new();
        for join in &select.joins {
            match join.kind {
                JoinKind::Inner => {
                    sql.push_str(&format!(" JOIN {} USING ({})", ident(&join.table), ident(&join.using)));
                }
                JoinKind::Anti => {
                    sql.push_str(&format!(
                        " LEFT JOIN {t} ON {f}.{u} = {t}.{u}",
                        t = ident(&join.table),
                        f = ident(&select.from),
                        u = ident(&join.using)
                    ));
                    anti.push(format!("{}.{} IS NULL", ident(&join.table), ident(&join.using)));
                }
            }
        }
        let mut conditions: Vec<String> = select.filter.iter().map(predicate).collect();
        conditions.extend(anti);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if !select.group_by.is_empty() {
            let groups: Vec<String> = select.group_by.iter().map(|g| ident(g)).collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }
        if !select.order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.order_list(select)));
        }
        if let Some(limit) = select.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    fn column_list(columns: &[String]) -> String {
        columns.iter().map(|c| ident(c)).collect::<Vec<_>>().join(", ")
    }
}

impl Dialect for MySql {
    fn render(&self, statement: &Statement) -> String {
        match statement {
            Statement::CreateTable { table } => create_table(table),
            Statement::DropTable { name } => format!("DROP TABLE IF EXISTS {}", ident(name)),
            Statement::RenameTable { from, to } => format!(
                "DROP TABLE IF EXISTS {to}; RENAME TABLE {from} TO {to}",
                from = ident(from),
                to = ident(to)
            ),
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                let values: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        let cells: Vec<String> = row.iter().map(literal).collect();
                        format!("({})", cells.join(", "))
                    })
                    .collect();
                format!(
                    "INSERT IGNORE INTO {} ({}) VALUES {}",
                    ident(table),
                    Self::column_list(columns),
                    values.join(", ")
                )
            }
            Statement::InsertSelect {
                table,
                columns,
                select,
            } => format!(
                "INSERT IGNORE INTO {} ({}) {}",
                ident(table),
                Self::column_list(columns),
                self.select(select)
            ),
            Statement::UpdateFrom {
                table,
                source,
                using,
                set,
            } => {
                let assignments: Vec<String> = set
                    .iter()
                    .map(|a| {
                        format!(
                            "{}.{} = {}.{}",
                            ident(table),
                            ident(&a.target),
                            ident(source),
                            ident(&a.source)
                        )
                    })
                    .collect();
                format!(
                    "UPDATE {} JOIN {} USING ({}) SET {}",
                    ident(table),
                    ident(source),
                    ident(using),
                    assignments.join(", ")
                )
            }
            Statement::Delete { table, filter } => {
                format!("DELETE FROM {}{}", ident(table), where_clause(filter))
            }
            Statement::Select(select) => self.select(select),
        }
    }
}
