use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use sluice::{Catalog, Config, ConfigError, Error, Kernel, Operation, Pair, Task, unit};

struct Fixture {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("nodes")).unwrap();
        Self { _dir: dir, root }
    }

    fn unit(&self, name: &str, text: &str) {
        fs::write(self.root.join("nodes").join(name), text).unwrap();
    }

    fn config(&self) -> Config {
        Config::default()
            .nodes_dir(self.root.join("nodes"))
            .data_dir(self.root.join("data"))
    }
}

type Log = Arc<Mutex<Vec<String>>>;

/// Catalog of two units: `a` fetches and saves, `b` only fetches.
fn catalog(data: &Utf8Path, log: &Log) -> Catalog {
    let store = sluice::Store::new(data);
    let mut catalog = Catalog::new();

    let (s, l) = (store.clone(), log.clone());
    catalog.add("fetch_a", move |ctx| {
        l.lock().unwrap().push(ctx.name().to_string());
        s.save_raw(ctx, "a", "json", br#"{"rows": [1, 2, 3]}"#)?;
        Ok(())
    });

    let (s, l) = (store.clone(), log.clone());
    catalog.add("save_a", move |ctx| {
        l.lock().unwrap().push(ctx.name().to_string());
        let bytes = s.load_raw(ctx, "a", "json")?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        s.save_state(ctx, "a", &value)?;
        Ok(())
    });

    let l = log.clone();
    catalog.add("fetch_b", move |ctx| {
        l.lock().unwrap().push(ctx.name().to_string());
        Ok(())
    });

    catalog
}

#[test]
fn test_two_units_from_directory() {
    let fx = Fixture::new();
    fx.unit("a.toml", "[[nodes]]\nproducer = \"fetch_a\"\ntransform = \"save_a\"\n");
    fx.unit("b.toml", "[[nodes]]\nproducer = \"fetch_b\"\n");
    fx.unit("_wip.toml", "[[nodes]]\nproducer = \"does_not_exist\"\n");

    let log = Log::default();
    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log));

    let dag = kernel.plan().unwrap();
    assert_eq!(dag.len(), 3);
    assert_eq!(dag.dependencies("save_a").unwrap(), vec!["fetch_a"]);
    assert!(dag.dependencies("fetch_b").unwrap().is_empty());

    let tracker = kernel.tracker();
    let diagnostics = kernel.run(&tracker).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["fetch_a", "save_a", "fetch_b"]);
    assert_eq!(diagnostics.executions.len(), 3);
    assert_eq!(tracker.current_task(), None);
}

#[test]
fn test_provenance_of_a_run() {
    let fx = Fixture::new();
    fx.unit("a.toml", "[[nodes]]\nproducer = \"fetch_a\"\ntransform = \"save_a\"\n");

    let log = Log::default();
    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log));
    let tracker = kernel.tracker();

    kernel.run(&tracker).unwrap();

    assert_eq!(tracker.writer("raw/a.json").unwrap(), "fetch_a");
    assert_eq!(tracker.writer("state/a.json").unwrap(), "save_a");
    assert_eq!(tracker.reads_by_task("save_a"), vec![Arc::<str>::from("raw/a.json")]);
    assert_eq!(
        tracker.assets_by_writer("save_a"),
        vec![Arc::<str>::from("state/a.json")]
    );

    let records = tracker.io_records(Some("save_a"));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].op, Operation::Read);
    assert_eq!(records[1].op, Operation::Write);
    assert!(records.iter().all(|r| r.stack.len() <= sluice::STACK_DEPTH));

    let path = fx.root.join("provenance.json");
    tracker.write_json(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 3);
    assert_eq!(json[0]["asset"], "raw/a.json");
    assert_eq!(json[0]["task"], "fetch_a");
    assert_eq!(json[0]["op"], "write");
}

#[test]
fn test_bad_manifest_aborts_before_any_task() {
    let fx = Fixture::new();
    fx.unit("a.toml", "[[nodes]]\nproducer = \"fetch_a\"\ntransform = \"save_a\"\n");
    fx.unit("b.toml", "[[nodes]\nproducer = ");

    let log = Log::default();
    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log));
    let tracker = kernel.tracker();

    let err = kernel.run(&tracker).unwrap_err();

    assert!(matches!(err, Error::Discovery { ref unit, .. } if unit == "b"));
    assert!(log.lock().unwrap().is_empty());
    assert!(tracker.io_records(None).is_empty());
}

#[test]
fn test_bad_manifest_reports_parse_error() {
    let fx = Fixture::new();
    fx.unit("b.toml", "[[nodes]\nproducer = ");

    let log = Log::default();
    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log));

    let msg = kernel.run(&kernel.tracker()).unwrap_err().to_string();

    assert!(msg.contains("Unit 'b' failed to load"));
    assert!(msg.contains("couldn't parse"));
    assert!(msg.contains("TOML parse error"));
}

#[test]
fn test_kernel_from_config_file() {
    let fx = Fixture::new();
    fx.unit("b.toml", "[[nodes]]\nproducer = \"fetch_b\"\n");

    let path = fx.root.join("sluice.toml");
    let text = format!("nodes_dir = \"{}\"\nstack_depth = 2\n", fx.root.join("nodes"));
    fs::write(&path, text).unwrap();

    let log = Log::default();
    let kernel = Kernel::from_file(&path, catalog(&fx.root.join("data"), &log)).unwrap();

    assert_eq!(kernel.config().stack_depth, 2);
    kernel.run(&kernel.tracker()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["fetch_b"]);

    let missing = Kernel::from_file(fx.root.join("missing.toml"), Catalog::new());
    assert!(matches!(missing, Err(Error::Config(ConfigError::Read { .. }))));
}

#[test]
fn test_failing_task_keeps_earlier_effects() {
    let fx = Fixture::new();
    let log = Log::default();

    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log))
        .add_unit(unit("c", |catalog| {
            let fetch = catalog.get("fetch_a").cloned().unwrap();
            let broken = Task::new("save_c", |_| anyhow::bail!("database is down"));
            Ok(vec![Pair::new(fetch, broken)])
        }))
        .add_unit(unit("b", |catalog| {
            Ok(vec![Pair::producer(catalog.get("fetch_b").cloned().unwrap())])
        }));

    let tracker = kernel.tracker();
    let err = kernel.run(&tracker).unwrap_err();

    match err {
        Error::Task { task, source } => {
            assert_eq!(task, "save_c");
            assert_eq!(source.to_string(), "database is down");
        }
        other => panic!("unexpected error {other:?}"),
    }

    assert_eq!(*log.lock().unwrap(), vec!["fetch_a"]);
    assert_eq!(tracker.writer("raw/a.json").unwrap(), "fetch_a");
    assert!(fx.root.join("data/raw/a.json").is_file());
}

#[test]
fn test_run_clears_previous_trace() {
    let fx = Fixture::new();
    fx.unit("b.toml", "[[nodes]]\nproducer = \"fetch_b\"\n");

    let log = Log::default();
    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log));
    let tracker = kernel.tracker();

    tracker.record_write("stale/asset");
    assert_eq!(tracker.io_records(None).len(), 1);

    kernel.run(&tracker).unwrap();

    assert!(tracker.io_records(None).is_empty());
}

#[test]
fn test_empty_nodes_dir_runs_nothing() {
    let fx = Fixture::new();
    let log = Log::default();
    let kernel = Kernel::new(fx.config(), catalog(&fx.root.join("data"), &log));

    let diagnostics = kernel.run(&kernel.tracker()).unwrap();

    assert!(diagnostics.executions.is_empty());
    assert!(log.lock().unwrap().is_empty());
}
