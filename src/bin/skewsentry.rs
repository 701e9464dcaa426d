//! SkewSentry CLI
//!
//! Commands:
//!   check     run an offline-vs-online skew check and gate on the verdict
//!   validate  load a feature spec and report contract violations
//!   init      write a spec skeleton inferred from a data file
//!   version   print the crate version
//!
//! Exit codes: 0 = check passed, 1 = skew detected (report `ok = false`),
//! 2 = configuration or load error. CI pipelines gate on this directly.

#![forbid(unsafe_code)]

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use skewsentry::{
    run_check, AdapterError, Column, Dtype, Feature, FeatureSpec, FnRegistry, HttpAdapter,
    NullPolicy, Producer, Table,
};

const USAGE: &str = "\
skewsentry — training/serving skew detector

USAGE:
  skewsentry check --spec <features.yml> --data <rows.csv|rows.json>
                   --offline <producer> (--online <producer> | --online-url <url>)
                   [--sample N] [--seed N] [--json out.json] [--html out.html]
                   [--batch-size N] [--retries N] [--timeout-secs N]
  skewsentry validate --spec <features.yml>
  skewsentry init <features.yml> --data <rows.csv|rows.json> --keys k1,k2
  skewsentry version

Registered in-process producers: demo_offline, demo_online
";

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn parse_usize(args: &[String], key: &str) -> Option<usize> {
    parse_flag(args, key).and_then(|s| s.parse().ok())
}

fn parse_u64(args: &[String], key: &str) -> Option<u64> {
    parse_flag(args, key).and_then(|s| s.parse().ok())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skewsentry=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("version") => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some("validate") => validate(&args),
        Some("init") => init(&args),
        Some("check") => check(&args).await,
        _ => {
            eprint!("{USAGE}");
            ExitCode::from(2)
        }
    }
}

fn validate(args: &[String]) -> ExitCode {
    let Some(spec_path) = parse_flag(args, "--spec") else {
        eprintln!("validate: --spec is required");
        return ExitCode::from(2);
    };
    match FeatureSpec::from_yaml(&spec_path) {
        Ok(spec) => {
            println!(
                "spec OK: {} feature(s), keys [{}]",
                spec.features.len(),
                spec.keys.join(", ")
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

/// Infer a spec skeleton from a data file: every non-key column becomes a
/// feature with a dtype matching its physical column type.
fn init(args: &[String]) -> ExitCode {
    let Some(out_path) = args.get(2).filter(|a| !a.starts_with("--")).cloned() else {
        eprintln!("init: output spec path is required");
        return ExitCode::from(2);
    };
    let Some(data_path) = parse_flag(args, "--data") else {
        eprintln!("init: --data is required");
        return ExitCode::from(2);
    };
    let Some(keys_arg) = parse_flag(args, "--keys") else {
        eprintln!("init: --keys is required (comma-separated)");
        return ExitCode::from(2);
    };
    let keys: Vec<String> = keys_arg
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    let table = match skewsentry::load_input(Path::new(&data_path)) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    for key in &keys {
        if !table.has_column(key) {
            eprintln!("init: data has no key column `{key}`");
            return ExitCode::from(2);
        }
    }

    let features: Vec<Feature> = table
        .column_names()
        .filter(|name| !keys.iter().any(|k| k == name))
        .map(|name| {
            let dtype = match table.column(name) {
                Some(Column::Int(_)) => Dtype::Int,
                Some(Column::Bool(_)) => Dtype::Bool,
                Some(Column::Str(_)) => Dtype::String,
                Some(Column::Timestamp(_)) => Dtype::Datetime,
                _ => Dtype::Float,
            };
            Feature {
                name: name.to_string(),
                dtype,
                nullable: true,
                tolerance: None,
                categories: None,
                range: None,
                window: None,
            }
        })
        .collect();

    let spec = FeatureSpec {
        version: 1,
        keys,
        features,
        null_policy: NullPolicy::Same,
    };
    match spec.validate().and_then(|()| spec.to_yaml_file(&out_path)) {
        Ok(()) => {
            println!("wrote spec skeleton to {out_path}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

async fn check(args: &[String]) -> ExitCode {
    let Some(spec_path) = parse_flag(args, "--spec") else {
        eprintln!("check: --spec is required");
        return ExitCode::from(2);
    };
    let Some(data_path) = parse_flag(args, "--data") else {
        eprintln!("check: --data is required");
        return ExitCode::from(2);
    };
    let Some(offline_name) = parse_flag(args, "--offline") else {
        eprintln!("check: --offline is required");
        return ExitCode::from(2);
    };

    let spec = match FeatureSpec::from_yaml(&spec_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let registry = builtin_registry();
    let offline: Box<dyn Producer> = match registry.resolve(&offline_name) {
        Ok(adapter) => Box::new(adapter),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    let online: Box<dyn Producer> = match (
        parse_flag(args, "--online"),
        parse_flag(args, "--online-url"),
    ) {
        (Some(name), None) => match registry.resolve(&name) {
            Ok(adapter) => Box::new(adapter),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(2);
            }
        },
        (None, Some(url)) => {
            let mut adapter = HttpAdapter::new(url);
            if let Some(n) = parse_usize(args, "--batch-size") {
                adapter = adapter.batch_size(n);
            }
            if let Some(n) = parse_u64(args, "--retries") {
                adapter = adapter.retries(n as u32);
            }
            if let Some(n) = parse_u64(args, "--timeout-secs") {
                adapter = adapter.timeout(Duration::from_secs(n));
            }
            Box::new(adapter)
        }
        _ => {
            eprintln!("check: exactly one of --online / --online-url is required");
            return ExitCode::from(2);
        }
    };

    let sample = parse_usize(args, "--sample");
    let seed = parse_u64(args, "--seed");

    let report = match run_check(
        &spec,
        Path::new(&data_path),
        &*offline,
        &*online,
        sample,
        seed,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    print!("{}", report.to_text());

    if let Some(json_path) = parse_flag(args, "--json") {
        match report.to_json() {
            Ok(json) => {
                if let Err(e) = std::fs::write(&json_path, json) {
                    eprintln!("write {json_path}: {e}");
                    return ExitCode::from(2);
                }
            }
            Err(e) => {
                eprintln!("serialize report: {e}");
                return ExitCode::from(2);
            }
        }
    }
    if let Some(html_path) = parse_flag(args, "--html") {
        let json_href = parse_flag(args, "--json");
        let html = report.to_html(json_href.as_deref());
        if let Err(e) = std::fs::write(&html_path, html) {
            eprintln!("write {html_path}: {e}");
            return ExitCode::from(2);
        }
    }

    if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

// ============================================================================
// Built-in demo producers
//
// A deliberately skewed pair: the offline path rounds spend to cents, the
// online path floors it. Within the demo spec's abs tolerance most rows
// agree; rows landing on a .xx5 boundary drift by one cent.
// ============================================================================

fn builtin_registry() -> FnRegistry {
    let mut registry = FnRegistry::new();
    registry.register("demo_offline", |input: &Table| {
        demo_spend(input, |cents| cents.round())
    });
    registry.register("demo_online", |input: &Table| {
        demo_spend(input, |cents| cents.floor())
    });
    registry
}

/// `spend = price * qty`, quantized to cents by `quantize`, with
/// `country` passed through. Key columns are reattached by the runner.
fn demo_spend(input: &Table, quantize: fn(f64) -> f64) -> Result<Table, AdapterError> {
    let price = input
        .column("price")
        .ok_or_else(|| AdapterError::Config("input is missing column `price`".to_string()))?;
    let qty = input
        .column("qty")
        .ok_or_else(|| AdapterError::Config("input is missing column `qty`".to_string()))?;

    let spend: Vec<Option<f64>> = (0..input.num_rows())
        .map(|i| match (price.get(i).as_f64(), qty.get(i).as_f64()) {
            (Some(p), Some(q)) => Some(quantize(p * q * 100.0) / 100.0),
            _ => None,
        })
        .collect();

    let mut out = Table::new();
    out.push_column("spend".to_string(), Column::Float(spend))
        .map_err(|e| AdapterError::ReturnShape(e.to_string()))?;
    if let Some(country) = input.column("country") {
        out.push_column("country".to_string(), country.clone())
            .map_err(|e| AdapterError::ReturnShape(e.to_string()))?;
    }
    Ok(out)
}
