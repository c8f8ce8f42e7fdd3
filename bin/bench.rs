use clap::{Arg, ArgAction, Command};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use xlsx_ingest::{
    FieldRegistry, ImportConfig, ImportController, ImportFile, ImportHooks, ImportOptions,
    ImportRecord,
};

#[derive(Debug, Default)]
struct SkuRow {
    sku: String,
    qty: i64,
    price: Decimal,
    active: bool,
}

impl ImportRecord for SkuRow {
    fn describe(fields: &mut FieldRegistry<Self>) {
        fields
            .column("sku", |r: &mut SkuRow, v: String| r.sku = v)
            .required()
            .validator(|v| v.starts_with("SKU"));
        fields
            .column("qty", |r: &mut SkuRow, v: i64| r.qty = v)
            .default_value("0");
        fields.column("price", |r: &mut SkuRow, v: Decimal| r.price = v);
        fields
            .column("active", |r: &mut SkuRow, v: bool| r.active = v)
            .default_value("true");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let matches = Command::new("bench")
        .arg(Arg::new("path").long("path").value_parser(clap::value_parser!(PathBuf)).required(true))
        .arg(Arg::new("config").long("config").help("TOML file with import defaults").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("batch").long("batch").help("Records per sink call").value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("max-rows").long("max-rows").help("Stop after N data rows").value_parser(clap::value_parser!(u64)))
        .arg(Arg::new("header-row").long("header-row").help("0-based sheet row of the header").value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("export-name").long("export-name").help("Rejected-row file name"))
        .arg(Arg::new("async").long("async").help("Detach the import and poll snapshots while it runs").action(ArgAction::SetTrue))
        .get_matches();

    let config = match matches.get_one::<PathBuf>("config") {
        Some(p) => ImportConfig::load_from_file(p)?,
        None => ImportConfig::load_default(),
    };
    let mut options = ImportOptions::from_config(config);
    if let Some(n) = matches.get_one::<usize>("batch") {
        options = options.batch_size(*n);
    }
    if let Some(n) = matches.get_one::<u64>("max-rows") {
        options = options.max_allowed_rows(*n);
    }
    if let Some(n) = matches.get_one::<usize>("header-row") {
        options = options.header_row_index(*n);
    }
    if let Some(name) = matches.get_one::<String>("export-name") {
        options = options.rejected_export_name(name.clone());
    }

    let sunk = Arc::new(AtomicU64::new(0));
    let batches = Arc::new(AtomicU64::new(0));
    let hooks = {
        let sunk = Arc::clone(&sunk);
        let batches = Arc::clone(&batches);
        ImportHooks::new(move |batch: Vec<SkuRow>| {
            sunk.fetch_add(batch.len() as u64, Ordering::Relaxed);
            batches.fetch_add(1, Ordering::Relaxed);
            async { Ok(()) }
        })
        .after_import(|counts| info!(?counts, "all batches delivered"))
    };

    let path = matches.get_one::<PathBuf>("path").unwrap();
    let controller = ImportController::new(ImportFile::xlsx(path), hooks, options)?;

    let start = Instant::now();
    let snapshot = if matches.get_flag("async") {
        let handle = controller.start_import_async();
        while !controller.is_finished() {
            let snap = controller.snapshot();
            println!(
                "progress={} total={} ok={} failed={}",
                snap.progress, snap.total_count, snap.success_count, snap.fail_count
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        handle.await?;
        controller.snapshot()
    } else {
        match controller.start_import().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                eprintln!("import ended with error: {e}");
                controller.snapshot()
            }
        }
    };
    let elapsed = start.elapsed().as_secs_f64();
    let rps = (snapshot.total_count as f64) / elapsed;

    println!(
        "source={} status={:?} outcome={:?} total={} ok={} failed={} batches={} sunk={}\nfail_file={}\nelapsed={:.1}s rows/sec={:.0}",
        path.display(),
        snapshot.status,
        snapshot.outcome,
        snapshot.total_count,
        snapshot.success_count,
        snapshot.fail_count,
        batches.load(Ordering::Relaxed),
        sunk.load(Ordering::Relaxed),
        snapshot.fail_file_url,
        elapsed,
        rps
    );
    Ok(())
}
