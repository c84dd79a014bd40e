// `sql` plugin - runs one query against `dsn` with `sqlx`'s `any` driver, and
// optionally saves the first row's columns (spec.md S4.2 table).

use std::collections::HashMap;

use async_trait::async_trait;
use rocketship_core::error::{Result, RocketshipError};
use rocketship_core::plugin::{Activity, ActivityInput, ActivityOutput};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Column, Row, TypeInfo};

#[derive(Debug, serde::Deserialize)]
struct SqlConfig {
    dsn: String,
    query: String,
}

pub struct SqlActivity;

impl Default for SqlActivity {
    fn default() -> Self {
        sqlx::any::install_default_drivers();
        Self
    }
}

#[async_trait]
impl Activity for SqlActivity {
    fn plugin_type(&self) -> &'static str {
        "sql"
    }

    async fn execute(&self, input: ActivityInput) -> Result<ActivityOutput> {
        let config = parse_config(&input.config)?;

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(&config.dsn)
            .await
            .map_err(|e| RocketshipError::transient(format!("connecting to database: {e}")))?;

        let row = sqlx::query(&config.query)
            .fetch_optional(&pool)
            .await
            .map_err(|e| RocketshipError::transient(format!("running query: {e}")))?;

        let mut output = ActivityOutput::new();
        if let Some(row) = row {
            if input.saves.is_empty() {
                // No save rules: nothing further to extract, the query ran
                // for its side effect.
            } else {
                for save in &input.saves {
                    let column = save.source_column();
                    let value = column_as_string(&row, column)?;
                    output.saved.insert(save.as_name.clone(), value);
                }
            }
        }

        Ok(output)
    }
}

/// `sql` saves don't use `json_path`/`header` - they name a column directly
/// via `as`, falling back to the `as` name itself as the column to read.
trait ColumnSource {
    fn source_column(&self) -> &str;
}

impl ColumnSource for rocketship_schemas::SaveRule {
    fn source_column(&self) -> &str {
        self.json_path
            .as_deref()
            .or(self.header.as_deref())
            .unwrap_or(&self.as_name)
    }
}

fn column_as_string(row: &AnyRow, column: &str) -> Result<String> {
    let idx = row
        .columns()
        .iter()
        .position(|c| c.name() == column)
        .ok_or_else(|| {
            RocketshipError::assertion_failed(format!("column '{column}' not present in result"))
        })?;

    let col = &row.columns()[idx];
    let value: Value = match col.type_info().name() {
        "INTEGER" | "BIGINT" | "INT4" | "INT8" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "DOUBLE" | "FLOAT8" => row
            .try_get::<f64, _>(idx)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BOOLEAN" | "BOOL" => row
            .try_get::<bool, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    };

    Ok(match value {
        Value::String(s) => s,
        Value::Null => "null".to_string(),
        other => other.to_string(),
    })
}

fn parse_config(raw: &HashMap<String, Value>) -> Result<SqlConfig> {
    let value = Value::Object(raw.clone().into_iter().collect());
    serde_json::from_value(value)
        .map_err(|e| RocketshipError::plugin_config_invalid("sql", e.to_string()))
}
