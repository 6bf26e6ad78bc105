//! Tools an engine can invoke. Each tool reports its own lifecycle through the
//! tool sink: `tool_call_start`, any data it publishes, then `tool_call_end`.

use std::time::Instant;

use anyhow::Result;
use chat_events::ToolSink;
use chat_protocol::{DataType, ToolId, ToolStatus};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
}

pub const DISPLAY_TABLE: ToolDefinition = ToolDefinition {
    name: "display_table",
    description: "Show tabular data to the user as a table",
};

#[derive(Debug, Clone, Default)]
pub struct Toolkit;

impl Toolkit {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![DISPLAY_TABLE]
    }

    /// Publish a table as a `dataframe` data block.
    #[instrument(skip(self, sink, columns, rows), fields(columns = columns.len(), rows = rows.len()))]
    pub async fn display_table(
        &self,
        sink: &ToolSink,
        table_name: &str,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Value> {
        let tool_id = ToolId::generate();
        let started = Instant::now();

        sink.start(
            tool_id.clone(),
            DISPLAY_TABLE.name,
            format!("Display table: {table_name}"),
            Some(json!({
                "table_name": table_name,
                "columns": columns.len(),
                "rows": rows.len(),
            })),
        )
        .await?;
        info!(%tool_id, table_name, "displaying table");

        sink.data(
            DataType::Dataframe,
            json!({
                "name": table_name,
                "columns": columns,
                "rows": rows,
            }),
            Some(json!({ "description": format!("Table data: {table_name}") })),
        )
        .await?;

        let result = json!({
            "type": "dataframe_display",
            "dataframe_name": table_name,
            "columns": columns,
            "data": rows,
        });
        sink.end(
            tool_id,
            ToolStatus::Success,
            Some(result.clone()),
            None,
            Some(started.elapsed().as_millis() as u64),
        )
        .await?;
        Ok(result)
    }
}
