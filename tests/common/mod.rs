#![allow(dead_code)]

// Shared fixtures: a toy SimpleCrop-like model with daily weather and yearly
// settings in, plant and soil tables out.

use meillionen::adapters::TableSchema;
use meillionen::domain::table::{Cell, Column, DataType, Table};
use meillionen::{
    Class, Dispatcher, Invocation, Invoker, MeillionenError, Method, Resource, Result, Schema,
    ValidatorRegistry, Value, Values,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn daily_schema() -> Schema {
    TableSchema::new()
        .column("doy", DataType::Int)
        .column("rain", DataType::Float)
        .column("tmax", DataType::Float)
        .min_rows(1)
        .into_schema("daily")
}

pub fn yearly_schema() -> Schema {
    TableSchema::new()
        .column("co2", DataType::Float)
        .column("sowing_doy", DataType::Int)
        .min_rows(1)
        .max_rows(1)
        .into_schema("yearly")
}

pub fn plant_schema() -> Schema {
    TableSchema::new()
        .column("doy", DataType::Int)
        .column("lai", DataType::Float)
        .into_schema("plant")
}

pub fn soil_schema() -> Schema {
    TableSchema::new()
        .column("doy", DataType::Int)
        .column("sw", DataType::Float)
        .into_schema("soil")
}

pub fn simplecrop_class() -> Class {
    let run = Method::new(
        "run",
        vec![daily_schema(), yearly_schema()],
        vec![plant_schema(), soil_schema()],
    )
    .unwrap();
    Class::new("simplecrop", vec![run]).unwrap()
}

/// Weather for `days` days, columns deliberately out of declared order.
pub fn daily_csv(days: u32) -> String {
    let mut csv = String::from("tmax,doy,rain\n");
    for doy in 1..=days {
        let rain = f64::from(doy % 7) * 0.5;
        csv.push_str(&format!("{},{},{}\n", 20 + doy % 10, doy, rain));
    }
    csv
}

pub fn yearly_csv() -> String {
    "co2,sowing_doy\n400,120\n".to_string()
}

pub fn daily_resource() -> Resource {
    Resource::inline(daily_csv(365), "csv")
}

pub fn yearly_resource() -> Resource {
    Resource::inline(yearly_csv(), "csv")
}

fn model_error(cause: &str) -> MeillionenError {
    MeillionenError::ExecutionError {
        cause: cause.to_string(),
    }
}

/// Deterministic stand-in for the crop model.
pub fn simulate(call: Invocation<'_>) -> Result<Values> {
    let daily = call
        .sources
        .get("daily")
        .and_then(Value::as_table)
        .ok_or_else(|| model_error("daily weather missing"))?;
    let co2 = call
        .sources
        .get("yearly")
        .and_then(Value::as_table)
        .and_then(|t| t.column("co2"))
        .and_then(|cells| cells.first().and_then(|c| c.as_f64()))
        .ok_or_else(|| model_error("co2 missing"))?;

    let doy = daily.column_index("doy").ok_or_else(|| model_error("no doy"))?;
    let rain = daily.column_index("rain").ok_or_else(|| model_error("no rain"))?;

    let mut plant = Table::new(vec![
        Column::new("doy", DataType::Int),
        Column::new("lai", DataType::Float),
    ]);
    let mut soil = Table::new(vec![
        Column::new("doy", DataType::Int),
        Column::new("sw", DataType::Float),
    ]);
    let mut lai = 0.0;
    for row in &daily.rows {
        let r = row[rain].as_f64().unwrap_or(0.0);
        lai += r * co2 / 4000.0;
        plant.push_row(vec![row[doy].clone(), Cell::Float(lai)]);
        soil.push_row(vec![row[doy].clone(), Cell::Float(r * 0.5)]);
    }

    let mut out = Values::new();
    out.insert("plant".to_string(), Value::Table(plant));
    out.insert("soil".to_string(), Value::Table(soil));
    Ok(out)
}

/// Wraps an invoker and counts calls into it.
pub struct Counting<I> {
    pub inner: I,
    pub calls: Arc<AtomicUsize>,
}

impl<I> Counting<I> {
    pub fn new(inner: I) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait::async_trait]
impl<I: Invoker> Invoker for Counting<I> {
    async fn invoke(&self, invocation: Invocation<'_>) -> Result<Values> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(invocation).await
    }
}

/// Never finishes within any reasonable timeout.
pub struct Stalled;

#[async_trait::async_trait]
impl Invoker for Stalled {
    async fn invoke(&self, _invocation: Invocation<'_>) -> Result<Values> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Values::new())
    }
}

pub fn dispatcher_with(invoker: Arc<dyn Invoker>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(Arc::new(ValidatorRegistry::with_builtins()));
    dispatcher
        .register_class(simplecrop_class(), invoker)
        .unwrap();
    dispatcher
}
