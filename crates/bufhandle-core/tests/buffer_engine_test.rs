use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bufhandle_core::{HandleError, IoConfig, LogEmitter, Registry, Whence, api, os};

static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_path(prefix: &str) -> PathBuf {
    let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "bufhandle-{prefix}-{}-{seq}.txt",
        std::process::id()
    ))
}

fn registry_with(config: IoConfig) -> Registry {
    Registry::new(config, LogEmitter::sink())
}

#[test]
fn hello_world_through_four_byte_buffer() {
    let reg = Registry::default();
    let path = temp_path("hello");

    let out = api::open(&reg, &path, ">").unwrap();
    api::setbuf(&out, 4).unwrap();
    for chunk in [&b"hel"[..], b"lo", b"\nwo", b"rld", b"\n"] {
        assert_eq!(api::write(&out, chunk).unwrap(), chunk.len());
    }
    api::flush(&out).unwrap();
    api::close(&reg, &out).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"hello\nworld\n");

    let input = api::open(&reg, &path, "<").unwrap();
    api::setbuf(&input, 4).unwrap();
    assert_eq!(api::readline(&input).unwrap(), "hello\n");
    assert_eq!(api::readline(&input).unwrap(), "world\n");
    assert_eq!(api::readline(&input).unwrap(), "");
    assert!(api::eof(&input));
    api::close(&reg, &input).unwrap();
    fs::remove_file(&path).unwrap();
}

#[test]
fn n_lines_then_one_empty_result_with_tiny_buffer() {
    let reg = registry_with(IoConfig {
        block_size: 3,
        ..IoConfig::default()
    });
    let path = temp_path("nlines");
    let lines: Vec<String> = (0..50).map(|i| format!("line number {i}\n")).collect();
    fs::write(&path, lines.concat()).unwrap();

    let h = api::open(&reg, &path, "<").unwrap();
    let mut seen = Vec::new();
    loop {
        let line = api::readline(&h).unwrap();
        if line.is_empty() {
            break;
        }
        seen.push(line);
    }
    assert_eq!(seen, lines);
    assert_eq!(api::readline(&h).unwrap(), "");
    fs::remove_file(&path).unwrap();
}

#[test]
fn flushed_writes_are_visible_in_order_through_second_handle() {
    let reg = Registry::default();
    let path = temp_path("order");
    let writer = api::open(&reg, &path, ">").unwrap();
    let reader = api::open(&reg, &path, "<").unwrap();

    api::puts(&writer, "first ").unwrap();
    api::puts(&writer, "second").unwrap();
    assert_eq!(api::reads(&reader, 32).unwrap(), b"");
    api::flush(&writer).unwrap();

    api::seek(&reader, 0, Whence::Set).unwrap();
    assert_eq!(api::reads(&reader, 12).unwrap(), b"first second");
    fs::remove_file(&path).unwrap();
}

#[test]
fn seek_to_tell_is_free_on_clean_buffer() {
    let reg = Registry::default();
    let path = temp_path("seektell");
    fs::write(&path, b"abcdefghij").unwrap();
    let h = api::open(&reg, &path, "<").unwrap();
    api::reads(&h, 4).unwrap();

    let pos = api::tell(&h).unwrap();
    let unread = h.lock().buffered_unread();
    let before = os::os_calls();
    assert_eq!(api::seek(&h, pos, Whence::Set).unwrap(), pos);
    assert_eq!(api::seek(&h, 0, Whence::Current).unwrap(), pos);
    assert_eq!(os::os_calls(), before);
    assert_eq!(h.lock().buffered_unread(), unread);
    assert_eq!(api::reads(&h, 2).unwrap(), b"ef");
    fs::remove_file(&path).unwrap();
}

#[test]
fn seek_after_mixed_buffered_and_direct_reads() {
    let reg = registry_with(IoConfig {
        block_size: 8,
        ..IoConfig::default()
    });
    let path = temp_path("mixed");
    fs::write(&path, b"abcdefghijklmnopqrstuvwxyz").unwrap();
    let h = api::open(&reg, &path, "<").unwrap();

    assert_eq!(api::reads(&h, 3).unwrap(), b"abc");
    // Drains the buffered "defgh", then bypasses the buffer for the rest.
    assert_eq!(api::reads(&h, 16).unwrap(), b"defghijklmnopqrs");
    assert_eq!(api::tell(&h).unwrap(), 19);

    for (target, expected) in [(5, b"f"), (7, b"h"), (8, b"i"), (18, b"s"), (1, b"b")] {
        assert_eq!(api::seek(&h, target, Whence::Set).unwrap(), target);
        assert_eq!(api::reads(&h, 1).unwrap(), expected, "at offset {target}");
    }
    assert_eq!(api::seek(&h, 17, Whence::Set).unwrap(), 17);
    assert_eq!(api::reads(&h, 4).unwrap(), b"rstu");
    fs::remove_file(&path).unwrap();
}

#[test]
fn read_after_write_without_flush_sees_committed_position() {
    let reg = Registry::default();
    let path = temp_path("rw");
    let h = api::open(&reg, &path, "+>").unwrap();
    api::write(&h, b"abc").unwrap();
    assert_eq!(api::tell(&h).unwrap(), 3);
    assert_eq!(api::reads(&h, 8).unwrap(), b"");
    assert_eq!(api::tell(&h).unwrap(), 3);
    assert_eq!(fs::read(&path).unwrap(), b"abc");

    api::seek(&h, 0, Whence::Set).unwrap();
    assert_eq!(api::reads(&h, 3).unwrap(), b"abc");
    fs::remove_file(&path).unwrap();
}

#[test]
fn append_mode_tracks_end_of_file() {
    let reg = Registry::default();
    let path = temp_path("append");
    fs::write(&path, b"head:").unwrap();
    let h = api::open(&reg, &path, ">>").unwrap();
    api::write(&h, b"tail").unwrap();
    api::flush(&h).unwrap();
    assert_eq!(api::tell(&h).unwrap(), 9);
    api::close(&reg, &h).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"head:tail");
    fs::remove_file(&path).unwrap();
}

#[test]
fn read_only_handle_refuses_writes() {
    let reg = Registry::default();
    let path = temp_path("ro");
    fs::write(&path, b"x").unwrap();
    let h = api::open(&reg, &path, "<").unwrap();
    assert!(matches!(
        api::write(&h, b"nope"),
        Err(HandleError::InvalidArgument(_))
    ));
    fs::remove_file(&path).unwrap();
}

#[test]
fn bad_modes_and_missing_files() {
    let reg = Registry::default();
    let path = temp_path("missing");
    assert!(matches!(
        api::open(&reg, &path, "r"),
        Err(HandleError::InvalidArgument(_))
    ));
    match api::open(&reg, &path, "<") {
        Err(HandleError::Transport { op, errno, .. }) => {
            assert_eq!(op, "open");
            assert_eq!(errno, libc::ENOENT);
        }
        other => panic!("expected ENOENT, got {other:?}"),
    }
}

#[test]
fn pipe_write_keeps_read_ahead_on_duplex_nonseekable() {
    // A pipe handle is one-directional, so exercise the bypass with a
    // socket pair wrapped as a file handle.
    let reg = Registry::default();
    let (a, b) = api::socketpair(&reg, 1, 1, 0).unwrap();
    let fd = os::dup(api::getfd(&b)).unwrap();
    let h = api::fdopen(&reg, fd, "+<").unwrap();

    api::send(&a, b"xyz").unwrap();
    assert_eq!(api::peek(&h).unwrap(), Some(b'x'));
    api::write(&h, b"reply").unwrap();
    api::flush(&h).unwrap();
    assert_eq!(api::reads(&h, 3).unwrap(), b"xyz");
    assert_eq!(api::recv(&a, Some(16)).unwrap(), b"reply");
}

#[test]
fn line_buffered_output_reaches_pipe_at_newline() {
    let reg = Registry::default();
    let (r, w) = api::pipe(&reg).unwrap();
    api::set_buffer_mode(&w, 1).unwrap();
    api::set_nonblocking(&r, true).unwrap();

    api::puts(&w, "partial").unwrap();
    assert!(api::reads(&r, 7).unwrap_err().is_would_block());
    api::puts(&w, " line\n").unwrap();
    assert_eq!(api::reads(&r, 13).unwrap(), b"partial line\n");
}

#[test]
fn unbuffered_handle_has_no_dirty_bytes() {
    let reg = Registry::default();
    let (r, w) = api::pipe(&reg).unwrap();
    api::setbuf(&w, 0).unwrap();
    api::write(&w, b"now").unwrap();
    assert_eq!(w.lock().buffered_dirty(), 0);
    assert_eq!(api::reads(&r, 3).unwrap(), b"now");
}
