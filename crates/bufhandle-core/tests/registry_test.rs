use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bufhandle_core::log::validate_log_line;
use bufhandle_core::{
    BufferMode, HandleError, IoConfig, LogEmitter, LogLevel, Registry, StdSlot, Whence, api, os,
};

static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_path(prefix: &str) -> PathBuf {
    let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "bufhandle-{prefix}-{}-{seq}.txt",
        std::process::id()
    ))
}

#[test]
fn standard_handles_get_their_modes() {
    let reg = Registry::default();
    reg.init_standard_handles().unwrap();
    let modes: Vec<BufferMode> = StdSlot::ALL
        .iter()
        .map(|slot| reg.std_handle(*slot).unwrap().lock().buffer_mode())
        .collect();
    assert_eq!(
        modes,
        [BufferMode::Line, BufferMode::Line, BufferMode::Unbuffered]
    );
    assert_eq!(api::getfd(&api::stderr(&reg).unwrap()), os::STDERR_FILENO);

    // Teardown flushes but never closes 0-2.
    let report = reg.teardown();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.closed, 0);
    assert_eq!(report.flushed, 3);
}

#[test]
fn swapping_stdout_redirects_printf() {
    let reg = Registry::default();
    let path = temp_path("stdout");
    let file = api::open(&reg, &path, ">").unwrap();
    assert!(api::stdhandle(&reg, 1, Some(file.clone())).unwrap().is_none());

    let out = api::stdout(&reg).unwrap();
    assert!(out.ptr_eq(&file));
    api::printf(&out, format_args!("{} + {} = {}\n", 2, 2, 4)).unwrap();

    let report = reg.teardown();
    assert!(report.is_clean());
    assert_eq!(fs::read_to_string(&path).unwrap(), "2 + 2 = 4\n");
    assert!(api::is_closed(&file));
    fs::remove_file(&path).unwrap();
}

#[test]
fn invalid_slot_is_rejected() {
    let reg = Registry::default();
    assert!(matches!(
        api::stdhandle(&reg, 3, None),
        Err(HandleError::InvalidArgument(_))
    ));
    assert!(matches!(api::stdin(&reg), Err(HandleError::ClosedHandle)));
}

#[test]
fn roots_follow_reachability() {
    let reg = Registry::default();
    let (r, w) = api::pipe(&reg).unwrap();
    let (a, b) = api::socketpair(&reg, 1, 1, 0).unwrap();
    api::stdhandle(&reg, 0, Some(r.clone())).unwrap();

    let mut visited = 0;
    reg.mark_roots(|_| visited += 1);
    assert_eq!(visited, 4);

    drop(a);
    drop(b);
    drop(w);
    drop(r);
    assert_eq!(reg.sweep(), 3);

    // The stdin slot still holds the reader.
    let mut roots = Vec::new();
    reg.mark_roots(|h| roots.push(h.id()));
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0], reg.std_handle(StdSlot::Input).unwrap().id());
}

#[test]
fn dropped_record_flushes_itself() {
    let reg = Registry::default();
    let path = temp_path("dropflush");
    let h = api::open(&reg, &path, ">").unwrap();
    api::write(&h, b"saved on drop").unwrap();
    drop(h);
    assert_eq!(fs::read(&path).unwrap(), b"saved on drop");
    assert_eq!(reg.sweep(), 1);
    fs::remove_file(&path).unwrap();
}

#[test]
fn lifecycle_events_are_valid_jsonl() {
    let (log, sink) = LogEmitter::to_buffer("registry", LogLevel::Debug);
    let reg = Registry::new(IoConfig::default(), log);
    let (r, w) = api::pipe(&reg).unwrap();
    api::stdhandle(&reg, 2, Some(w.clone())).unwrap();
    api::close(&reg, &r).unwrap();
    api::write(&w, b"orphaned").unwrap();
    let report = reg.teardown();
    assert_eq!(report.failures.len(), 1);

    let out = sink.contents();
    let events: Vec<String> = out
        .lines()
        .enumerate()
        .map(|(i, line)| validate_log_line(line, i + 1).unwrap().event)
        .collect();
    assert!(events.contains(&"handle_open".to_string()));
    assert!(events.contains(&"handle_close".to_string()));
    assert!(events.contains(&"std_swap".to_string()));
    assert!(events.contains(&"teardown_flush_failed".to_string()));
}

#[test]
fn info_level_hides_debug_events() {
    let (log, sink) = LogEmitter::to_buffer("registry", LogLevel::Info);
    let reg = Registry::new(IoConfig::default(), log);
    let (r, _w) = api::pipe(&reg).unwrap();
    api::close(&reg, &r).unwrap();
    assert!(sink.contents().is_empty());
}

#[test]
fn command_pipe_reads_lines_and_reports_exit_status() {
    let reg = Registry::default();
    let h = api::open_pipe(&reg, "echo alpha; echo beta; exit 3", "<").unwrap();
    assert!(h.lock().child_pid().is_some());
    assert_eq!(api::readline(&h).unwrap(), "alpha\n");
    assert_eq!(api::readline(&h).unwrap(), "beta\n");
    assert_eq!(api::readline(&h).unwrap(), "");
    assert!(matches!(
        api::seek(&h, 0, Whence::Set),
        Err(HandleError::InvalidArgument(_))
    ));
    assert_eq!(api::exit_status(&h), None);

    api::close(&reg, &h).unwrap();
    assert_eq!(api::exit_status(&h), Some(3));
}

#[test]
fn command_pipe_feeds_child_input() {
    let reg = Registry::default();
    let path = temp_path("cmdin");
    let h = api::open_pipe(&reg, &format!("cat > '{}'", path.display()), ">").unwrap();
    api::puts(&h, "to the child\n").unwrap();
    assert!(matches!(
        api::readline(&h),
        Err(HandleError::InvalidArgument(_))
    ));

    api::close(&reg, &h).unwrap();
    assert_eq!(api::exit_status(&h), Some(0));
    assert_eq!(fs::read_to_string(&path).unwrap(), "to the child\n");
    fs::remove_file(&path).unwrap();
}

#[test]
fn command_pipe_modes_are_one_way() {
    let reg = Registry::default();
    for mode in ["+<", ">>", "r"] {
        assert!(matches!(
            api::open_pipe(&reg, "true", mode),
            Err(HandleError::InvalidArgument(_))
        ));
    }
}

#[test]
fn teardown_reaps_command_pipes() {
    let reg = Registry::default();
    let h = api::open_pipe(&reg, "exit 5", "<").unwrap();
    let report = reg.teardown();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.closed, 1);
    assert!(api::is_closed(&h));
    assert_eq!(api::exit_status(&h), Some(5));
}
