use anyhow::Result;
use livescout::filters::ExcludeFilter;
use livescout::search::ExecutorState;
use livescout::store::FileContent;
use livescout::{
    FileStore, MemoryFileStore, QueryFilters, SearchConfig, SearchEngine, SessionId, StreamEvent,
};
use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;
use tempfile::tempdir;

fn test_config() -> SearchConfig {
    SearchConfig {
        thread_count: NonZeroUsize::new(4).unwrap(),
        ..SearchConfig::default()
    }
}

fn memory_engine(files: &[(&str, &str)], config: SearchConfig) -> Result<(Arc<MemoryFileStore>, SearchEngine)> {
    let store = Arc::new(MemoryFileStore::with_files("/workspace", files));
    let engine = SearchEngine::new(config, store.clone())?;
    Ok((store, engine))
}

fn relative_paths(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .flat_map(|e| e.results().iter().map(|r| r.relative_path.clone()))
        .collect()
}

#[test]
fn test_directory_files_before_root_files() -> Result<()> {
    let (_store, engine) = memory_engine(
        &[("a/x.ts", "foo bar"), ("a/y.ts", "nothing here"), ("b.ts", "foo")],
        test_config(),
    )?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let events: Vec<StreamEvent> = engine.submit_query(&session, "foo")?.unwrap().collect();
    assert_eq!(relative_paths(&events), vec!["a/x.ts", "b.ts"]);
    for result in events.iter().flat_map(|e| e.results()) {
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line, 1);
    }
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    Ok(())
}

#[test]
fn test_oversized_file_is_skipped() -> Result<()> {
    let (store, engine) = memory_engine(&[("small.txt", "needle")], test_config())?;
    store.insert("huge.txt", "needle\n".repeat(600 * 1024 / 7 + 1));
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let summary = engine
        .submit_query(&session, "needle")?
        .unwrap()
        .collect_summary();
    assert_eq!(summary.files_with_matches, 1);
    assert_eq!(summary.file_results[0].relative_path, "small.txt");
    assert_eq!(engine.metrics().get_stats().files_oversized, 1);
    Ok(())
}

#[test]
fn test_file_growing_past_limit_is_skipped_without_refresh() -> Result<()> {
    let config = SearchConfig {
        max_file_size: 100,
        ..test_config()
    };
    let (store, engine) = memory_engine(&[("a.txt", "needle")], config)?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let first = engine.submit_query(&session, "needle")?.unwrap().collect_summary();
    assert_eq!(first.files_with_matches, 1);

    store.insert("a.txt", format!("needle{}", "x".repeat(10_000)));
    let second = engine.submit_query(&session, "needle")?.unwrap().collect_summary();
    assert_eq!(second.files_with_matches, 0);
    assert_eq!(engine.metrics().get_stats().files_oversized, 1);

    store.insert("a.txt", "needle");
    let third = engine.submit_query(&session, "needle")?.unwrap().collect_summary();
    assert_eq!(third.files_with_matches, 1);
    Ok(())
}

#[test]
fn test_case_insensitive_match_column() -> Result<()> {
    let (_store, engine) = memory_engine(&[("notes.txt", "this has foo in it")], test_config())?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let summary = engine.submit_query(&session, "FOO")?.unwrap().collect_summary();
    assert_eq!(summary.total_matches, 1);
    let m = &summary.file_results[0].matches[0];
    assert_eq!(m.column, "this has foo in it".find("foo").unwrap());
    assert_eq!(&m.preview[m.preview_column..m.preview_column + 3], "foo");
    Ok(())
}

#[test]
fn test_max_matches_per_file() -> Result<()> {
    let config = SearchConfig {
        max_matches_per_file: Some(1),
        ..test_config()
    };
    let (_store, engine) = memory_engine(&[("three.txt", "foo\nfoo\nfoo\n")], config)?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let summary = engine.submit_query(&session, "foo")?.unwrap().collect_summary();
    assert_eq!(summary.total_matches, 1);
    assert_eq!(summary.file_results[0].matches[0].line, 1);
    Ok(())
}

/// A store whose reads block until the gate opens, reporting each blocked read.
struct GatedStore {
    inner: MemoryFileStore,
    open: Mutex<bool>,
    opened: Condvar,
    entered: Mutex<Sender<PathBuf>>,
}

impl GatedStore {
    fn new(inner: MemoryFileStore) -> (Self, Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel();
        let store = Self {
            inner,
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: Mutex::new(tx),
        };
        (store, rx)
    }

    fn open_gate(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl FileStore for GatedStore {
    fn enumerate(&self, exclude: &ExcludeFilter, max_files: Option<usize>, deadline: Instant) -> Vec<PathBuf> {
        self.inner.enumerate(exclude, max_files, deadline)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.inner.size(path)
    }

    fn read(&self, path: &Path) -> io::Result<FileContent> {
        let mut open = self.open.lock().unwrap();
        if !*open {
            let _ = self.entered.lock().unwrap().send(path.to_path_buf());
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
        }
        drop(open);
        self.inner.read(path)
    }

    fn display_path(&self, path: &Path) -> String {
        self.inner.display_path(path)
    }
}

#[test]
fn test_superseded_query_never_delivers() -> Result<()> {
    let mut files = Vec::new();
    for i in 0..10 {
        files.push((format!("dir/file_{}.txt", i), "the cat and the dog".to_string()));
    }
    let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    let (store, entered) = GatedStore::new(MemoryFileStore::with_files("/workspace", &files));
    let store = Arc::new(store);
    let config = SearchConfig {
        batch_size: NonZeroUsize::new(4).unwrap(),
        ..test_config()
    };
    let engine = SearchEngine::new(config, store.clone())?;
    let session = SessionId::new("panel");
    assert_eq!(engine.open_session(&session), 10);

    let cat = engine.submit_query(&session, "cat")?.unwrap();
    let worker = thread::spawn(move || {
        let mut run = cat;
        let events: Vec<StreamEvent> = run.by_ref().collect();
        (events, run.state())
    });

    // The first "cat" batch is now in flight
    entered.recv()?;
    let dog = engine.submit_query(&session, "dog")?.unwrap();
    store.open_gate();

    let (cat_events, cat_state) = worker.join().expect("worker panicked");
    assert!(cat_events.is_empty());
    assert_eq!(cat_state, ExecutorState::Superseded);

    let dog_events: Vec<StreamEvent> = dog.collect();
    assert!(matches!(dog_events[0], StreamEvent::FirstBatch(_)));
    assert_eq!(relative_paths(&dog_events).len(), 10);
    for result in dog_events.iter().flat_map(|e| e.results()) {
        assert!(result.matches.iter().all(|m| m.preview.contains("dog")));
    }
    Ok(())
}

#[test]
fn test_superseded_by_query_without_matches() -> Result<()> {
    let (_store, engine) = memory_engine(&[("a.txt", "cat"), ("b.txt", "cat")], SearchConfig {
        batch_size: NonZeroUsize::new(1).unwrap(),
        ..test_config()
    })?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let mut cat = engine.submit_query(&session, "cat")?.unwrap();
    assert!(cat.next().is_some());

    let dog: Vec<StreamEvent> = engine.submit_query(&session, "dog")?.unwrap().collect();
    assert_eq!(cat.next(), None);
    assert_eq!(dog, vec![StreamEvent::NoResults, StreamEvent::Done]);
    Ok(())
}

#[test]
fn test_sessions_do_not_interfere() -> Result<()> {
    let (_store, engine) = memory_engine(&[("a.txt", "cat dog")], test_config())?;
    let left = SessionId::new("left");
    let right = SessionId::new("right");
    engine.open_session(&left);
    engine.open_session(&right);

    let cat = engine.submit_query(&left, "cat")?.unwrap();
    let dog = engine.submit_query(&right, "dog")?.unwrap();
    assert_eq!(cat.collect_summary().files_with_matches, 1);
    assert_eq!(dog.collect_summary().files_with_matches, 1);
    Ok(())
}

#[test]
fn test_close_session_starves_run() -> Result<()> {
    let (_store, engine) = memory_engine(&[("a.txt", "cat")], test_config())?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let mut run = engine.submit_query(&session, "cat")?.unwrap();
    assert!(engine.close_session(&session));
    assert_eq!(run.next(), None);
    assert_eq!(run.state(), ExecutorState::SessionClosed);
    assert!(engine.submit_query(&session, "cat").is_err());
    Ok(())
}

#[test]
fn test_unreadable_file_does_not_abort() -> Result<()> {
    let (store, engine) = memory_engine(
        &[("a.txt", "needle"), ("b.txt", "needle"), ("c.txt", "needle")],
        test_config(),
    )?;
    store.fail_reads_for("b.txt");
    let session = SessionId::new("panel");
    engine.open_session(&session);
    store.remove("c.txt");

    let summary = engine
        .submit_query(&session, "needle")?
        .unwrap()
        .collect_summary();
    assert_eq!(summary.files_with_matches, 1);
    assert_eq!(summary.file_results[0].relative_path, "a.txt");
    assert_eq!(engine.metrics().get_stats().files_failed, 2);
    Ok(())
}

#[test]
fn test_max_results_stops_scheduling() -> Result<()> {
    let mut files = Vec::new();
    for i in 0..30 {
        files.push((format!("f{:02}.txt", i), "match me"));
    }
    let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), *c)).collect();
    let config = SearchConfig {
        max_results: Some(5),
        batch_size: NonZeroUsize::new(4).unwrap(),
        ..test_config()
    };
    let (_store, engine) = memory_engine(&files, config)?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let summary = engine.submit_query(&session, "match")?.unwrap().collect_summary();
    // The batch that crosses the limit still completes
    assert_eq!(summary.files_with_matches, 8);
    assert_eq!(summary.batches, 2);
    Ok(())
}

#[test]
fn test_include_and_exclude_filters() -> Result<()> {
    let (_store, engine) = memory_engine(
        &[
            ("src/main.rs", "fn todo() {}"),
            ("src/gen/api.rs", "// todo"),
            ("tests/it.rs", "todo!()"),
            ("README.md", "TODO"),
        ],
        test_config(),
    )?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let filters = QueryFilters::new("**/*.rs", "src/gen")?;
    let events: Vec<StreamEvent> = engine
        .submit_query_with(&session, "todo", &filters)?
        .unwrap()
        .collect();
    assert_eq!(relative_paths(&events), vec!["src/main.rs", "tests/it.rs"]);

    let filters = QueryFilters::new("*.{md,txt}", "")?;
    let events: Vec<StreamEvent> = engine
        .submit_query_with(&session, "todo", &filters)?
        .unwrap()
        .collect();
    assert_eq!(relative_paths(&events), vec!["README.md"]);
    Ok(())
}

#[test]
fn test_filesystem_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("src/nested"))?;
    fs::create_dir_all(dir.path().join("node_modules/pkg"))?;
    fs::create_dir_all(dir.path().join(".git"))?;

    let mut file = File::create(dir.path().join("src/lib.rs"))?;
    writeln!(file, "// TODO: first")?;
    writeln!(file, "fn main() {{}}")?;
    writeln!(file, "    // todo: second")?;
    fs::write(dir.path().join("src/nested/deep.rs"), "let todo = 1;\r\n")?;
    fs::write(dir.path().join("Cargo.toml"), "# todo")?;
    fs::write(dir.path().join("node_modules/pkg/index.js"), "todo")?;
    fs::write(dir.path().join(".git/HEAD"), "todo")?;
    fs::write(dir.path().join("logo.png"), "todo")?;

    let config = SearchConfig {
        roots: vec![dir.path().to_path_buf()],
        ..test_config()
    };
    let engine = SearchEngine::from_config(config)?;
    let session = SessionId::new("cli");
    assert_eq!(engine.open_session(&session), 3);

    let files: Vec<String> = engine
        .session_files(&session)?
        .iter()
        .map(|f| f.display_path().to_string())
        .collect();
    assert_eq!(files, vec!["src/nested/deep.rs", "src/lib.rs", "Cargo.toml"]);

    let summary = engine.submit_query(&session, "todo")?.unwrap().collect_summary();
    assert_eq!(summary.files_with_matches, 3);
    assert_eq!(summary.total_matches, 4);

    let lib = &summary.file_results[1];
    assert_eq!(lib.relative_path, "src/lib.rs");
    assert_eq!(lib.matches[1].line, 3);
    assert_eq!(lib.matches[1].column, 7);
    assert_eq!(lib.matches[1].preview, "// todo: second");
    assert_eq!(lib.matches[1].preview_column, 3);

    let content = engine.file_content(&dir.path().join("Cargo.toml"))?;
    assert_eq!(&*content, "# todo");
    Ok(())
}

#[test]
fn test_json_contract() -> Result<()> {
    let (_store, engine) = memory_engine(&[("a.txt", "  hello world")], test_config())?;
    let session = SessionId::new("panel");
    engine.open_session(&session);

    let events: Vec<StreamEvent> = engine.submit_query(&session, "WORLD")?.unwrap().collect();
    let json = serde_json::to_value(&events)?;
    assert_eq!(json[0]["type"], "firstBatch");
    let m = &json[0]["results"][0]["matches"][0];
    assert_eq!(m["relativePath"], "a.txt");
    assert_eq!(m["line"], 1);
    assert_eq!(m["column"], 8);
    assert_eq!(m["preview"], "hello world");
    assert_eq!(m["previewColumn"], 6);
    assert!(json[0]["results"][0].get("decoration").is_none());
    assert_eq!(json[1]["type"], "done");
    Ok(())
}
