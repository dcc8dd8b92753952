mod common;

use common::*;
use meillionen::adapters::FnInvoker;
use meillionen::domain::table::{Cell, Column, DataType, Table};
use meillionen::{
    Class, Dispatcher, Invocation, MeillionenError, Method, MethodRequest, Resource, Schema,
    ValidatorRegistry, Value, Values,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn simplecrop_request() -> MethodRequest {
    MethodRequest::new("simplecrop", "run")
        .with_source("daily", daily_resource())
        .with_source("yearly", yearly_resource())
}

#[tokio::test]
async fn test_simplecrop_dispatch_returns_plant_and_soil() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));

    let sinks = dispatcher.dispatch(&simplecrop_request()).await.unwrap();

    let names: Vec<&str> = sinks.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["plant", "soil"]);

    let registry = dispatcher.registry();
    let plant = registry
        .validate(&plant_schema(), &sinks["plant"], dispatcher.handles())
        .unwrap();
    assert_eq!(plant.as_table().unwrap().num_rows(), 365);
    assert!(registry
        .validate(&soil_schema(), &sinks["soil"], dispatcher.handles())
        .is_ok());
}

#[tokio::test]
async fn test_missing_source_reported_by_name() {
    let schema = |name: &str| Schema::new(name, "bytes", Vec::new());
    let method = Method::new("run", vec![schema("a"), schema("b")], vec![]).unwrap();
    let class = Class::new("pair", vec![method]).unwrap();
    let (invoker, calls) = Counting::new(FnInvoker::new(|_: Invocation<'_>| Ok(Values::new())));

    let mut dispatcher = Dispatcher::new(Arc::new(ValidatorRegistry::with_builtins()));
    dispatcher.register_class(class, Arc::new(invoker)).unwrap();

    let only_a = MethodRequest::new("pair", "run").with_source("a", Resource::inline("x", "bin"));
    for _ in 0..5 {
        assert!(matches!(
            dispatcher.dispatch(&only_a).await,
            Err(MeillionenError::MissingSource { ref name }) if name == "b"
        ));
    }

    // A missing source is reported ahead of a malformed one.
    let bad_a = MethodRequest::new("pair", "run").with_source("a", Resource::handle(99));
    assert!(matches!(
        dispatcher.dispatch(&bad_a).await,
        Err(MeillionenError::MissingSource { ref name }) if name == "b"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_class_and_method() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));

    let err = dispatcher
        .dispatch(&MethodRequest::new("landlab", "run"))
        .await
        .unwrap_err();
    assert!(matches!(err, MeillionenError::UnknownClass { ref class } if class == "landlab"));

    let err = dispatcher
        .dispatch(&MethodRequest::new("simplecrop", "step"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MeillionenError::UnknownMethod { ref method, .. } if method == "step"
    ));
}

#[tokio::test]
async fn test_invalid_source_stops_before_invocation() {
    let (invoker, calls) = Counting::new(FnInvoker::new(simulate));
    let dispatcher = dispatcher_with(Arc::new(invoker));

    let request = MethodRequest::new("simplecrop", "run")
        .with_source("daily", Resource::inline("doy,rain\n1,0.5\n", "csv"))
        .with_source("yearly", yearly_resource());
    let err = dispatcher.dispatch(&request).await.unwrap_err();

    assert!(matches!(err, MeillionenError::InvalidSource { ref name, .. } if name == "daily"));
    assert!(matches!(err.root(), MeillionenError::SchemaMismatch { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_file_is_a_mismatch() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));
    let request = MethodRequest::new("simplecrop", "run")
        .with_source("daily", Resource::file("/nonexistent/daily.csv", "csv"))
        .with_source("yearly", yearly_resource());

    let err = dispatcher.dispatch(&request).await.unwrap_err();
    assert!(matches!(err.root(), MeillionenError::SchemaMismatch { .. }));
}

#[tokio::test]
async fn test_unregistered_type_name() {
    let method = Method::new("run", vec![Schema::new("grid", "netcdf", Vec::new())], vec![]).unwrap();
    let class = Class::new("landlab", vec![method]).unwrap();
    let mut dispatcher = Dispatcher::new(Arc::new(ValidatorRegistry::with_builtins()));
    dispatcher
        .register_class(
            class,
            Arc::new(FnInvoker::new(|_: Invocation<'_>| Ok(Values::new()))),
        )
        .unwrap();

    let request =
        MethodRequest::new("landlab", "run").with_source("grid", Resource::file("dem.nc", "netcdf"));
    let err = dispatcher.dispatch(&request).await.unwrap_err();
    assert!(matches!(
        err.root(),
        MeillionenError::UnknownTypeName { ref type_name } if type_name == "netcdf"
    ));
}

#[tokio::test]
async fn test_missing_sink_writes_nothing() {
    let partial = FnInvoker::new(|call: Invocation<'_>| {
        let mut out = simulate(call)?;
        out.remove("soil");
        Ok(out)
    });
    let dispatcher = dispatcher_with(Arc::new(partial));

    let dir = TempDir::new().unwrap();
    let plant_path = dir.path().join("plant.csv");
    let request = simplecrop_request().with_sink("plant", Resource::file(&plant_path, "csv"));

    let err = dispatcher.dispatch(&request).await.unwrap_err();
    assert!(matches!(err, MeillionenError::MissingSink { ref name } if name == "soil"));
    assert!(!plant_path.exists());
}

#[tokio::test]
async fn test_malformed_sink() {
    let wrong = FnInvoker::new(|call: Invocation<'_>| {
        let mut out = simulate(call)?;
        let table = Table::new(vec![Column::new("day", DataType::Int)])
            .with_rows(vec![vec![Cell::Int(1)]]);
        out.insert("plant".to_string(), Value::Table(table));
        Ok(out)
    });
    let dispatcher = dispatcher_with(Arc::new(wrong));

    let err = dispatcher.dispatch(&simplecrop_request()).await.unwrap_err();
    assert!(matches!(err, MeillionenError::InvalidSink { ref name, .. } if name == "plant"));
}

#[tokio::test]
async fn test_execution_error_is_surfaced_once() {
    let (invoker, calls) = Counting::new(FnInvoker::new(|_: Invocation<'_>| {
        Err(MeillionenError::ExecutionError {
            cause: "segfault in soil water balance".to_string(),
        })
    }));
    let dispatcher = dispatcher_with(Arc::new(invoker));

    let err = dispatcher.dispatch(&simplecrop_request()).await.unwrap_err();
    assert!(matches!(
        err,
        MeillionenError::ExecutionError { ref cause } if cause.contains("soil water")
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invocation_timeout() {
    let dispatcher = dispatcher_with(Arc::new(Stalled)).with_timeout(Duration::from_millis(50));

    let err = dispatcher.dispatch(&simplecrop_request()).await.unwrap_err();
    assert!(matches!(err, MeillionenError::ExecutionTimeout { .. }));
}

#[tokio::test]
async fn test_sink_destinations() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));
    let dir = TempDir::new().unwrap();
    let plant_path = dir.path().join("out").join("plant.tsv");
    let slot = dispatcher.handles().insert(Value::Bytes(Vec::new()));

    let request = simplecrop_request()
        .with_sink("plant", Resource::file(&plant_path, "tsv"))
        .with_sink("soil", Resource::handle(slot));
    let sinks = dispatcher.dispatch(&request).await.unwrap();

    assert_eq!(sinks["plant"], Resource::file(&plant_path, "tsv"));
    let written = std::fs::read_to_string(&plant_path).unwrap();
    assert!(written.starts_with("doy\tlai\n"));

    assert_eq!(sinks["soil"], Resource::handle(slot));
    let stored = dispatcher.handles().get(slot).unwrap();
    assert_eq!(stored.as_table().unwrap().num_rows(), 365);
}

#[tokio::test]
async fn test_sink_columns_stored_in_declared_order() {
    let swapped = FnInvoker::new(|call: Invocation<'_>| {
        let mut out = simulate(call)?;
        if let Some(Value::Table(soil)) = out.get("soil") {
            let rows = soil
                .rows
                .iter()
                .map(|row| vec![row[1].clone(), row[0].clone()])
                .collect();
            let sw_first = Table::new(vec![
                Column::new("sw", DataType::Float),
                Column::new("doy", DataType::Int),
            ])
            .with_rows(rows);
            out.insert("soil".to_string(), Value::Table(sw_first));
        }
        Ok(out)
    });
    let dispatcher = dispatcher_with(Arc::new(swapped));
    let slot = dispatcher.handles().insert(Value::Bytes(Vec::new()));

    let request = simplecrop_request().with_sink("soil", Resource::handle(slot));
    dispatcher.dispatch(&request).await.unwrap();

    let stored = dispatcher.handles().get(slot).unwrap();
    let soil = stored.as_table().unwrap();
    assert_eq!(soil.column_names(), vec!["doy", "sw"]);
    assert_eq!(soil.rows[0][0], Cell::Int(1));
}

#[tokio::test]
async fn test_unknown_handle_destination_fails_before_writing() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));
    let dir = TempDir::new().unwrap();
    let plant_path = dir.path().join("plant.csv");

    let request = simplecrop_request()
        .with_sink("plant", Resource::file(&plant_path, "csv"))
        .with_sink("soil", Resource::handle(404));
    let err = dispatcher.dispatch(&request).await.unwrap_err();

    assert!(matches!(err, MeillionenError::InvalidSink { ref name, .. } if name == "soil"));
    assert!(matches!(err.root(), MeillionenError::UnknownHandle { id: 404 }));
    assert!(!plant_path.exists());
}

#[tokio::test]
async fn test_handle_sources_and_extra_keys() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));
    let registry = dispatcher.registry();
    let daily = registry
        .validate(&daily_schema(), &daily_resource(), dispatcher.handles())
        .unwrap();
    let id = dispatcher.handles().insert(daily);

    let request = MethodRequest::new("simplecrop", "run")
        .with_source("daily", Resource::handle(id))
        .with_source("yearly", yearly_resource())
        .with_source("hourly", Resource::inline("ignored", "bin"));
    let by_handle = dispatcher.dispatch(&request).await.unwrap();
    let inline = dispatcher.dispatch(&simplecrop_request()).await.unwrap();
    assert_eq!(by_handle, inline);
}

#[tokio::test]
async fn test_sinks_round_trip_through_registry() {
    let dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));
    let sinks = dispatcher.dispatch(&simplecrop_request()).await.unwrap();
    let registry = dispatcher.registry();

    for (schema, name) in [(plant_schema(), "plant"), (soil_schema(), "soil")] {
        let value = registry
            .validate(&schema, &sinks[name], dispatcher.handles())
            .unwrap();
        let again = registry
            .encode(&schema, &value, None, dispatcher.handles())
            .unwrap();
        assert_eq!(again, sinks[name]);
    }
}

#[tokio::test]
async fn test_concurrent_dispatch() {
    let dispatcher = Arc::new(dispatcher_with(Arc::new(FnInvoker::new(simulate))));
    let expected = dispatcher.dispatch(&simplecrop_request()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let dispatcher = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move {
            dispatcher.dispatch(&simplecrop_request()).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), expected);
    }
}

#[test]
fn test_duplicate_class_registration() {
    let mut dispatcher = dispatcher_with(Arc::new(FnInvoker::new(simulate)));
    let err = dispatcher
        .register_class(simplecrop_class(), Arc::new(FnInvoker::new(simulate)))
        .unwrap_err();
    assert!(matches!(err, MeillionenError::DuplicateClass { .. }));
    assert_eq!(dispatcher.interface().classes().len(), 1);
}
