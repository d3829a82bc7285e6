//! Statement IR.
//!
//! A deliberately small relational algebra: enough to express dictionary
//! construction, volatile-table materialization and registry bookkeeping.
//! Every statement is plain data, so a [`Procedure`] can be serialized into
//! the registry and replayed after a restart.

use crate::ddl::TableDef;
use crate::value::{Row, Value};
use serde::{Deserialize, Serialize};

/// How a joined table combines with the rows built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Keep combinations whose `using` columns are equal.
    Inner,
    /// Keep left rows with no match on the right (`LEFT JOIN .. IS NULL`).
    Anti,
}

/// `JOIN <table> USING (<using>)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub table: String,
    pub using: String,
    pub kind: JoinKind,
}

impl Join {
    pub fn inner(table: impl Into<String>, using: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            using: using.into(),
            kind: JoinKind::Inner,
        }
    }

    pub fn anti(table: impl Into<String>, using: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            using: using.into(),
            kind: JoinKind::Anti,
        }
    }
}

/// One output column of a select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Projection {
    Column { name: String },
    Count { alias: String },
    CountDistinct { column: String, alias: String },
    Min { column: String, alias: String },
    Max { column: String, alias: String },
    MaxCharLength { column: String, alias: String },
    /// Dense identifiers continuing an existing sequence: the first output
    /// row gets `MAX(table.column) + 1` (or 0 when the table is empty), the
    /// rest follow in output order.
    Sequence {
        alias: String,
        table: String,
        column: String,
    },
}

impl Projection {
    pub fn column(name: impl Into<String>) -> Self {
        Projection::Column { name: name.into() }
    }

    pub fn count(alias: impl Into<String>) -> Self {
        Projection::Count {
            alias: alias.into(),
        }
    }

    /// Name of the output column this projection produces.
    pub fn output_name(&self) -> &str {
        match self {
            Projection::Column { name } => name,
            Projection::Count { alias }
            | Projection::CountDistinct { alias, .. }
            | Projection::Min { alias, .. }
            | Projection::Max { alias, .. }
            | Projection::MaxCharLength { alias, .. }
            | Projection::Sequence { alias, .. } => alias,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !matches!(
            self,
            Projection::Column { .. } | Projection::Sequence { .. }
        )
    }
}

/// A row filter. All predicates of a select are ANDed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { column: String, value: Value },
    Gt { column: String, value: Value },
    IsNull { column: String },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::Gt { column, .. }
            | Predicate::IsNull { column } => column,
        }
    }
}

/// `ORDER BY <column> [DESC]`, referring to an output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A read query. An empty projection selects every column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Select {
    pub from: String,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub projection: Vec<Projection>,
    #[serde(default)]
    pub filter: Vec<Predicate>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            from: table.into(),
            ..Self::default()
        }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection.push(projection);
        self
    }

    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection
            .extend(names.into_iter().map(|n| Projection::column(n)));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Tables this select reads from.
    pub fn tables(&self) -> Vec<&str> {
        let mut out = vec![self.from.as_str()];
        out.extend(self.joins.iter().map(|j| j.table.as_str()));
        for p in &self.projection {
            if let Projection::Sequence { table, .. } = p {
                out.push(table);
            }
        }
        out
    }
}

/// `SET target = source.column` in a joined update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub target: String,
    pub source: String,
}

/// A store command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// Create the table unless it already exists.
    CreateTable { table: TableDef },
    /// Drop the table if it exists.
    DropTable { name: String },
    /// Rename, replacing any table already called `to`.
    RenameTable { from: String, to: String },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Row>,
    },
    InsertSelect {
        table: String,
        columns: Vec<String>,
        select: Select,
    },
    /// `UPDATE table JOIN source USING (using) SET ...`.
    UpdateFrom {
        table: String,
        source: String,
        using: String,
        set: Vec<Assignment>,
    },
    Delete {
        table: String,
        filter: Vec<Predicate>,
    },
    Select(Select),
}

impl Statement {
    pub fn create(table: TableDef) -> Self {
        Statement::CreateTable { table }
    }

    pub fn drop(name: impl Into<String>) -> Self {
        Statement::DropTable { name: name.into() }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Statement::RenameTable {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether the statement can change store contents.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }
}

/// An ordered sequence of statements: the unit registered for rehydration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub steps: Vec<Statement>,
}

impl Procedure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, statement: Statement) -> Self {
        self.steps.push(statement);
        self
    }

    pub fn push(&mut self, statement: Statement) {
        self.steps.push(statement);
    }

    pub fn extend(&mut self, other: Procedure) {
        self.steps.extend(other.steps);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::{ColumnSpec, ColumnType, Engine};

    #[test]
    fn test_procedure_serializes_as_plain_data() {
        let proc = Procedure::new()
            .step(Statement::drop("genre_lookup__tmp"))
            .step(Statement::create(
                TableDef::new("genre_lookup__tmp", Engine::Volatile)
                    .column(ColumnSpec::new("genre__id", ColumnType::UInt8).primary_key()),
            ))
            .step(Statement::InsertSelect {
                table: "genre_lookup__tmp".into(),
                columns: vec!["genre__id".into()],
                select: Select::from("genre__id").columns(["genre__id"]),
            })
            .step(Statement::rename("genre_lookup__tmp", "genre_lookup"));

        let json = serde_json::to_string(&proc).unwrap();
        let back: Procedure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proc);
        assert!(json.contains("\"kind\":\"rename_table\""));
    }

    #[test]
    fn test_select_tables_include_sequence_source() {
        let select = Select::from("genre__counts")
            .join(Join::anti("genre__id", "genre"))
            .project(Projection::Sequence {
                alias: "genre__id".into(),
                table: "genre__id".into(),
                column: "genre__id".into(),
            });
        assert_eq!(select.tables(), vec!["genre__counts", "genre__id", "genre__id"]);
    }

    #[test]
    fn test_output_names() {
        assert_eq!(Projection::count("count").output_name(), "count");
        assert!(Projection::count("count").is_aggregate());
        assert!(!Projection::column("genre").is_aggregate());
    }
}
