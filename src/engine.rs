use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use snowflake_connector_rs::{
    SnowflakeAuthMethod, SnowflakeClient, SnowflakeClientConfig, SnowflakeSession,
};

use crate::config::ConnectionConfig;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Failed to connect to Snowflake: {0}")]
    Connect(String),

    #[error("Error executing SQL: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

/// Tabular result of one statement. `None` cells are SQL NULL; every row has
/// one cell per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return write!(f, "(empty result set)");
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate().take(widths.len()) {
                let len = cell.as_deref().unwrap_or("NULL").chars().count();
                widths[i] = widths[i].max(len);
            }
        }

        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{:<width$}", col.name, width = widths[i])?;
        }
        writeln!(f)?;

        for (i, w) in widths.iter().enumerate() {
            if i > 0 {
                write!(f, "-+-")?;
            }
            write!(f, "{}", "-".repeat(*w))?;
        }
        writeln!(f)?;

        for row in &self.rows {
            for (i, width) in widths.iter().enumerate() {
                if i > 0 {
                    write!(f, " | ")?;
                }
                let cell = row.get(i).and_then(|c| c.as_deref()).unwrap_or("NULL");
                write!(f, "{:<width$}", cell, width = *width)?;
            }
            writeln!(f)?;
        }

        write!(f, "({} row{})", self.rows.len(), if self.rows.len() == 1 { "" } else { "s" })
    }
}

/// Remove trailing statement terminators (and surrounding whitespace) so the
/// text can be submitted as a single statement.
pub fn strip_statement_terminators(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Read every row's cells at the given column positions, in order.
fn cells_by_position<R>(
    rows: &[R],
    positions: &[usize],
    cell: impl Fn(&R, usize) -> Option<String>,
) -> Vec<Vec<Option<String>>> {
    rows.iter()
        .map(|row| positions.iter().map(|&idx| cell(row, idx)).collect())
        .collect()
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn query(&self, sql: &str) -> Result<QueryResult, WarehouseError>;
}

/// Strip terminators and run `sql` on `warehouse`.
pub async fn run_query<W>(warehouse: &W, sql: &str) -> Result<QueryResult, WarehouseError>
where
    W: Warehouse + ?Sized,
{
    let statement = strip_statement_terminators(sql);
    if statement.is_empty() {
        return Err(WarehouseError::Query("empty statement".to_string()));
    }
    warehouse.query(statement).await
}

#[derive(Clone)]
pub struct SnowflakeEngine {
    session: Arc<SnowflakeSession>,
    account: String,
    database: Option<String>,
    schema: Option<String>,
}

impl fmt::Debug for SnowflakeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeEngine")
            .field("account", &self.account)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

impl SnowflakeEngine {
    pub async fn new(connection: &ConnectionConfig) -> Result<Self, WarehouseError> {
        let client = SnowflakeClient::new(
            &connection.user,
            SnowflakeAuthMethod::Password(connection.password.clone()),
            SnowflakeClientConfig {
                account: connection.account.clone(),
                role: connection.role.clone(),
                warehouse: connection.warehouse.clone(),
                database: connection.database.clone(),
                schema: connection.schema.clone(),
                timeout: Some(std::time::Duration::from_secs(30)),
            },
        )
        .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        let session = client
            .create_session()
            .await
            .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        info!(account = %connection.account, "connected to Snowflake");

        Ok(Self {
            session: Arc::new(session),
            account: connection.account.clone(),
            database: connection.database.clone(),
            schema: connection.schema.clone(),
        })
    }
}

#[async_trait]
impl Warehouse for SnowflakeEngine {
    async fn query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        info!(sql = %sql, "executing warehouse query");

        let rows = self
            .session
            .query(sql)
            .await
            .map_err(|e| WarehouseError::Query(e.to_string()))?;

        let (columns, positions): (Vec<Column>, Vec<usize>) =
            rows.first().map_or_else(Default::default, |first_row| {
                first_row
                    .column_types()
                    .into_iter()
                    .map(|col| {
                        (
                            Column {
                                name: col.name().to_string(),
                                data_type: col.column_type().snowflake_type().to_string(),
                            },
                            col.index(),
                        )
                    })
                    .unzip()
            });

        let rows = cells_by_position(&rows, &positions, |row, idx| row.at::<String>(idx).ok());

        Ok(QueryResult { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingWarehouse {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Warehouse for RecordingWarehouse {
        async fn query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(QueryResult::default())
        }
    }

    fn sample() -> QueryResult {
        QueryResult {
            columns: vec![
                Column { name: "FARM".into(), data_type: "TEXT".into() },
                Column { name: "ACRES".into(), data_type: "FIXED".into() },
            ],
            rows: vec![
                vec![Some("North Field".into()), Some("120".into())],
                vec![Some("Creek".into()), None],
            ],
        }
    }

    #[test]
    fn strips_trailing_terminators() {
        assert_eq!(strip_statement_terminators("SELECT 1;"), "SELECT 1");
        assert_eq!(strip_statement_terminators("SELECT 1 ; ;\n"), "SELECT 1");
        assert_eq!(strip_statement_terminators("SELECT ';' AS x"), "SELECT ';' AS x");
        assert_eq!(strip_statement_terminators(";;"), "");
    }

    #[tokio::test]
    async fn run_query_submits_stripped_statement() {
        let warehouse = RecordingWarehouse { statements: Mutex::new(Vec::new()) };
        run_query(&warehouse, "  SELECT * FROM farms;  ").await.unwrap();
        assert_eq!(*warehouse.statements.lock().unwrap(), vec!["SELECT * FROM farms"]);
    }

    #[tokio::test]
    async fn run_query_rejects_blank_statement() {
        let warehouse = RecordingWarehouse { statements: Mutex::new(Vec::new()) };
        let err = run_query(&warehouse, " ; ").await.unwrap_err();
        assert!(matches!(err, WarehouseError::Query(_)));
        assert!(warehouse.statements.lock().unwrap().is_empty());
    }

    #[test]
    fn display_renders_aligned_table_with_nulls() {
        let rendered = sample().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "FARM        | ACRES");
        assert_eq!(lines[1], "------------+------");
        assert_eq!(lines[2], "North Field | 120  ");
        assert_eq!(lines[3], "Creek       | NULL ");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn cells_are_read_by_position_not_name() {
        let rows = vec![
            vec![Some("farm_a"), None, Some("10")],
            vec![Some("farm_b"), Some("x"), Some("20")],
        ];
        let cells = cells_by_position(&rows, &[2, 0, 1], |row, idx| {
            row.get(idx).copied().flatten().map(str::to_string)
        });

        assert_eq!(
            cells,
            vec![
                vec![Some("10".to_string()), Some("farm_a".to_string()), None],
                vec![Some("20".to_string()), Some("farm_b".to_string()), Some("x".to_string())],
            ]
        );
    }

    #[test]
    fn display_without_columns() {
        assert_eq!(QueryResult::default().to_string(), "(empty result set)");
    }

    #[test]
    fn emptiness_follows_rows() {
        let mut result = sample();
        assert!(!result.is_empty());
        assert_eq!(result.row_count(), 2);
        result.rows.clear();
        assert!(result.is_empty());
    }
}
