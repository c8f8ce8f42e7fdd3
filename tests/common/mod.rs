#![allow(dead_code)]

use csv_async::{AsyncReaderBuilder, StringRecord};
use std::path::Path;
use std::sync::{Arc, Mutex};
use xlsx_ingest::{CounterSnapshot, FieldRegistry, ImportConfig, ImportHooks, ImportOptions, ImportRecord};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i64,
    pub email: String,
}

impl ImportRecord for Person {
    fn describe(fields: &mut FieldRegistry<Self>) {
        fields
            .column("name", |p: &mut Person, v: String| p.name = v)
            .required();
        fields
            .column("age", |p: &mut Person, v: i64| p.age = v)
            .default_value("0");
        fields
            .column("email", |p: &mut Person, v: String| p.email = v)
            .validator(|v| !v.trim().is_empty());
    }
}

/// Hook calls in the order the listener made them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Before(usize),
    Batch(usize),
    After(CounterSnapshot),
}

#[derive(Clone)]
pub struct Recorder<T> {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub records: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Hooks that log every call; the sink fails on call number `fail_on`.
    pub fn hooks_failing_on(&self, fail_on: Option<usize>) -> ImportHooks<T> {
        let sink_events = Arc::clone(&self.events);
        let records = Arc::clone(&self.records);
        let before_events = Arc::clone(&self.events);
        let after_events = Arc::clone(&self.events);

        ImportHooks::new(move |batch: Vec<T>| {
            let mut events = sink_events.lock().unwrap();
            events.push(Event::Batch(batch.len()));
            let call = events
                .iter()
                .filter(|e| matches!(e, Event::Batch(_)))
                .count();
            drop(events);
            let result = if Some(call) == fail_on {
                Err(anyhow::anyhow!("storage unavailable"))
            } else {
                records.lock().unwrap().extend(batch);
                Ok(())
            };
            async move { result }
        })
        .before_import(move |batch: &mut Vec<T>| {
            before_events.lock().unwrap().push(Event::Before(batch.len()));
        })
        .after_import(move |counts| after_events.lock().unwrap().push(Event::After(counts)))
    }

    pub fn hooks(&self) -> ImportHooks<T> {
        self.hooks_failing_on(None)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Batch(n) => Some(n),
                _ => None,
            })
            .collect()
    }
}

impl<T: Clone> Recorder<T> {
    pub fn records(&self) -> Vec<T> {
        self.records.lock().unwrap().clone()
    }
}

pub fn options_in(dir: &Path) -> ImportOptions {
    ImportOptions::from_config(ImportConfig::default().with_export_base_path(dir))
}

/// Reads a CSV export back as rows, header included.
pub async fn read_csv(path: &Path) -> anyhow::Result<Vec<Vec<String>>> {
    let file = tokio::fs::File::open(path).await?;
    let mut rdr = AsyncReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .create_reader(file);
    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    while rdr.read_record(&mut record).await? {
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

pub fn people(n: usize) -> Vec<Vec<String>> {
    let mut rows = vec![vec!["name".to_string(), "age".to_string(), "email".to_string()]];
    for i in 0..n {
        rows.push(vec![format!("p{i}"), i.to_string(), format!("p{i}@x")]);
    }
    rows
}
