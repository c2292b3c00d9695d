//! SHOW operators: materialize a static batch from a catalog snapshot.

use crate::error::EngineResult;
use crate::exec::{Batch, ExecContext, PhysicalOperator, Schema};
use crate::storage::RowId;
use crate::value::{DataType, Value};

fn rows_to_batch(rows: Vec<Vec<Value>>) -> Option<Batch> {
    if rows.is_empty() {
        return None;
    }
    Some(Batch {
        rows: rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| (RowId { page_id: 0, slot: i as u32 }, values))
            .collect(),
    })
}

macro_rules! show_operator {
    ($name:ident, $label:expr) => {
        pub struct $name {
            schema: Schema,
            table: Option<String>,
            done: bool,
        }

        impl $name {
            pub fn new(schema: Schema, table: Option<String>) -> Self {
                Self { schema, table, done: false }
            }
        }

        impl PhysicalOperator for $name {
            fn name(&self) -> String {
                match &self.table {
                    Some(t) => format!("{}({})", $label, t),
                    None => $label.to_string(),
                }
            }

            fn schema(&self) -> &Schema {
                &self.schema
            }

            fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
                if self.done {
                    return Ok(None);
                }
                self.done = true;
                let rows = self.collect(ctx)?;
                Ok(rows_to_batch(rows))
            }
        }
    };
}

show_operator!(ShowDatabases, "ShowDatabases");
show_operator!(ShowTables, "ShowTables");
show_operator!(ShowColumns, "ShowColumns");
show_operator!(ShowIndex, "ShowIndex");
show_operator!(ShowViews, "ShowViews");
show_operator!(ShowTriggers, "ShowTriggers");

impl ShowDatabases {
    pub fn output_schema() -> Schema {
        Schema::bare(vec![("database_name".into(), DataType::Varchar)])
    }

    fn collect(&self, ctx: &ExecContext) -> EngineResult<Vec<Vec<Value>>> {
        Ok(ctx
            .catalog
            .list_databases()
            .into_iter()
            .map(|d| vec![Value::Str(d)])
            .collect())
    }
}

impl ShowTables {
    pub fn output_schema() -> Schema {
        Schema::bare(vec![("table_name".into(), DataType::Varchar)])
    }

    fn collect(&self, ctx: &ExecContext) -> EngineResult<Vec<Vec<Value>>> {
        Ok(ctx
            .catalog
            .list_tables(&ctx.db)
            .into_iter()
            .map(|t| vec![Value::Str(t)])
            .collect())
    }
}

impl ShowColumns {
    pub fn output_schema() -> Schema {
        Schema::bare(vec![
            ("column_name".into(), DataType::Varchar),
            ("data_type".into(), DataType::Varchar),
            ("nullable".into(), DataType::Boolean),
            ("key".into(), DataType::Varchar),
            ("default_value".into(), DataType::Varchar),
        ])
    }

    fn collect(&self, ctx: &ExecContext) -> EngineResult<Vec<Vec<Value>>> {
        let table = self.table.as_deref().unwrap_or_default();
        let info = ctx.catalog.get_table(&ctx.db, table)?;
        Ok(info
            .columns
            .iter()
            .map(|c| {
                vec![
                    Value::Str(c.name.clone()),
                    Value::Str(c.data_type.to_string()),
                    Value::Bool(c.nullable),
                    Value::Str(if c.is_primary_key { "PRI".into() } else { String::new() }),
                    match &c.default {
                        Some(v) => Value::Str(v.to_string()),
                        None => Value::Null,
                    },
                ]
            })
            .collect())
    }
}

impl ShowIndex {
    pub fn output_schema() -> Schema {
        Schema::bare(vec![
            ("index_name".into(), DataType::Varchar),
            ("column_name".into(), DataType::Varchar),
            ("unique".into(), DataType::Boolean),
            ("method".into(), DataType::Varchar),
        ])
    }

    fn collect(&self, ctx: &ExecContext) -> EngineResult<Vec<Vec<Value>>> {
        let table = self.table.as_deref().unwrap_or_default();
        let info = ctx.catalog.get_table(&ctx.db, table)?;
        Ok(info
            .indexes
            .values()
            .map(|idx| {
                vec![
                    Value::Str(idx.name.clone()),
                    Value::Str(idx.columns.join(", ")),
                    Value::Bool(idx.unique),
                    Value::Str("BTREE".into()),
                ]
            })
            .collect())
    }
}

impl ShowViews {
    pub fn output_schema() -> Schema {
        Schema::bare(vec![
            ("view_name".into(), DataType::Varchar),
            ("definition".into(), DataType::Text),
            ("creator".into(), DataType::Varchar),
        ])
    }

    fn collect(&self, ctx: &ExecContext) -> EngineResult<Vec<Vec<Value>>> {
        Ok(ctx
            .catalog
            .list_views(&ctx.db)
            .into_iter()
            .map(|v| {
                vec![
                    Value::Str(v.name),
                    Value::Str(v.definition_sql),
                    Value::Str(v.creator),
                ]
            })
            .collect())
    }
}

impl ShowTriggers {
    pub fn output_schema() -> Schema {
        Schema::bare(vec![
            ("trigger_name".into(), DataType::Varchar),
            ("table_name".into(), DataType::Varchar),
            ("timing".into(), DataType::Varchar),
            ("events".into(), DataType::Varchar),
            ("row_level".into(), DataType::Boolean),
        ])
    }

    fn collect(&self, ctx: &ExecContext) -> EngineResult<Vec<Vec<Value>>> {
        Ok(ctx
            .catalog
            .list_triggers(&ctx.db)
            .into_iter()
            .map(|t| {
                let events: Vec<&str> = t
                    .events
                    .iter()
                    .map(|e| match e {
                        crate::catalog::TriggerEvent::Insert => "INSERT",
                        crate::catalog::TriggerEvent::Update => "UPDATE",
                        crate::catalog::TriggerEvent::Delete => "DELETE",
                    })
                    .collect();
                vec![
                    Value::Str(t.name),
                    Value::Str(t.table),
                    Value::Str(
                        match t.timing {
                            crate::catalog::TriggerTiming::Before => "BEFORE",
                            crate::catalog::TriggerTiming::After => "AFTER",
                        }
                        .to_string(),
                    ),
                    Value::Str(events.join(", ")),
                    Value::Bool(t.row_level),
                ]
            })
            .collect())
    }
}
