use crate::CoreError;
use crate::event::{ChangeEvent, Operation};
use crate::mapper::ColumnMapper;
use crate::value::{Row, Value};

pub const DEFAULT_SCHEMA: &str = "main";

/// A parameterized SQL statement. `args[i]` binds placeholder `?{i + 1}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    pub fn main(table: &str) -> Self {
        Self::new(DEFAULT_SCHEMA, table)
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn key_values(data: &Row, primary_key: &[String]) -> Result<Vec<Value>, CoreError> {
    primary_key
        .iter()
        .map(|column| {
            data.get(column)
                .cloned()
                .ok_or_else(|| CoreError::MissingPrimaryKey {
                    column: column.clone(),
                })
        })
        .collect()
}

/// `"a" = ?{first} AND "b" = ?{first + 1} ...`
fn key_predicate(primary_key: &[String], first: usize) -> String {
    primary_key
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", quote_ident(column), first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Build the statement applying one already-mapped change. `Ok(None)` means
/// the change has nothing to write.
pub fn build_statement(
    target: &TableRef,
    operation: Operation,
    data: &Row,
    primary_key: &[String],
) -> Result<Option<Statement>, CoreError> {
    match operation {
        Operation::Insert => {
            key_values(data, primary_key)?;
            let columns: Vec<String> = data.keys().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> = (1..=data.len()).map(|i| format!("?{i}")).collect();
            Ok(Some(Statement::new(
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    target.qualified(),
                    columns.join(", "),
                    placeholders.join(", ")
                ),
                data.values().cloned().collect(),
            )))
        }

        Operation::Update => {
            // Key columns identify the row and are never reassigned.
            let assigned: Vec<(&String, &Value)> = data
                .iter()
                .filter(|(column, _)| !primary_key.contains(*column))
                .collect();
            if assigned.is_empty() {
                return Ok(None);
            }
            let keys = key_values(data, primary_key)?;
            let set_clause = assigned
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{} = ?{}", quote_ident(column), i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                target.qualified(),
                set_clause,
                key_predicate(primary_key, assigned.len() + 1)
            );
            let mut args: Vec<Value> = assigned.into_iter().map(|(_, v)| v.clone()).collect();
            args.extend(keys);
            Ok(Some(Statement::new(sql, args)))
        }

        Operation::Delete => {
            let keys = key_values(data, primary_key)?;
            Ok(Some(Statement::new(
                format!(
                    "DELETE FROM {} WHERE {}",
                    target.qualified(),
                    key_predicate(primary_key, 1)
                ),
                keys,
            )))
        }
    }
}

/// Map and build one event. Events without an operation tag yield `Ok(None)`;
/// an unrecognised tag is an error.
pub fn statement_for_event(
    target: &TableRef,
    mapper: &ColumnMapper,
    primary_key: &[String],
    event: &ChangeEvent,
) -> Result<Option<Statement>, CoreError> {
    let Some(operation) = event.operation()? else {
        return Ok(None);
    };
    let data = mapper.map(event)?;
    build_statement(target, operation, &data, primary_key)
}
