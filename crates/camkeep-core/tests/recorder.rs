mod support;

use std::fs;
use std::time::Duration;

use camkeep_core::{CameraIdentity, CameraSpec, Config, Error, Job, Recorder};
use chrono::NaiveTime;
use support::{FakeBackend, Read, Stream, at};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config(root: &TempDir) -> Config {
    let mut config = Config::resolve(None, |_| None).expect("defaults");
    config.recordings_root = root.path().to_path_buf();
    config.retention_days = 2;
    config.segment_length = Duration::from_secs(60);
    config.sweep_at = NaiveTime::from_hms_opt(23, 55, 0).expect("time");
    config
}

fn spec(name: &str, url: &str) -> CameraSpec {
    CameraSpec {
        name: name.parse().expect("valid"),
        url: url.into(),
    }
}

fn id(name: &str) -> CameraIdentity {
    name.parse().expect("valid")
}

#[test]
fn failed_reads_do_not_advance_counters() {
    let tmp = TempDir::new().expect("tempdir");
    let lobby = Stream::new((640, 480));
    lobby.script([Read::Empty; 5]);
    let backend = FakeBackend::default().with_stream("rtsp://lobby", &lobby);
    let journal = backend.journal.clone();
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &config(&tmp), start).expect("recorder");
    recorder
        .add_camera(&spec("Lobby", "rtsp://lobby"), start)
        .expect("camera starts");
    let cancel = CancellationToken::new();

    for second in 1..=5 {
        let summary = recorder.tick(at(2024, 3, 10, 12, 0, second), &cancel);
        assert_eq!(summary.frames_written, 0);
        assert_eq!(summary.frames_skipped, 1);
        assert!(summary.stopped.is_empty());
    }

    let status = &recorder.registry().statuses()[0];
    assert_eq!(status.session.files_saved, 0);
    assert_eq!(status.session.frames_written, 0);
    assert_eq!(status.frames_captured, 0);
    assert_eq!(status.consecutive_read_failures, 5);
    assert!(journal.borrow().frames.is_empty());

    let summary = recorder.tick(at(2024, 3, 10, 12, 0, 6), &cancel);
    assert_eq!(summary.frames_written, 1);
    assert_eq!(recorder.registry().statuses()[0].consecutive_read_failures, 0);
}

#[test]
fn closed_source_skips_the_tick() {
    let tmp = TempDir::new().expect("tempdir");
    let lobby = Stream::new((640, 480));
    let backend = FakeBackend::default().with_stream("rtsp://lobby", &lobby);
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &config(&tmp), start).expect("recorder");
    recorder
        .add_camera(&spec("Lobby", "rtsp://lobby"), start)
        .expect("camera starts");
    let cancel = CancellationToken::new();

    lobby.open.set(false);
    let summary = recorder.tick(at(2024, 3, 10, 12, 0, 1), &cancel);
    assert_eq!(summary.frames_skipped, 1);
    assert!(recorder.registry().contains(&id("Lobby")));

    lobby.open.set(true);
    let summary = recorder.tick(at(2024, 3, 10, 12, 0, 2), &cancel);
    assert_eq!(summary.frames_written, 1);
}

#[test]
fn unreachable_camera_is_left_out() {
    let tmp = TempDir::new().expect("tempdir");
    let yard = Stream::new((1920, 1080));
    let backend = FakeBackend::default().with_stream("rtsp://yard", &yard);
    let journal = backend.journal.clone();
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &config(&tmp), start).expect("recorder");

    let started = recorder.start_cameras(
        &[spec("Lobby", "rtsp://nowhere"), spec("Yard", "rtsp://yard")],
        start,
    );
    assert_eq!(started, 1);
    assert_eq!(recorder.registry().identities(), vec![id("Yard")]);
    assert!(!tmp.path().join("Lobby").exists());
    // the failed source is handed back to the backend
    assert_eq!(journal.borrow().captures_released, 1);

    let err = recorder
        .add_camera(&spec("Yard", "rtsp://yard"), start)
        .expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateCamera(_)));
}

#[test]
fn schedule_rotates_each_camera_every_segment() {
    let tmp = TempDir::new().expect("tempdir");
    let lobby = Stream::new((640, 480));
    let backend = FakeBackend::default().with_stream("rtsp://lobby", &lobby);
    let journal = backend.journal.clone();
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &config(&tmp), start).expect("recorder");
    recorder
        .add_camera(&spec("Lobby", "rtsp://lobby"), start)
        .expect("camera starts");
    let cancel = CancellationToken::new();

    assert_eq!(recorder.tick(at(2024, 3, 10, 12, 0, 30), &cancel).rotations, 0);
    assert_eq!(recorder.tick(at(2024, 3, 10, 12, 1, 0), &cancel).rotations, 1);
    assert_eq!(recorder.tick(at(2024, 3, 10, 12, 1, 30), &cancel).rotations, 0);
    assert_eq!(recorder.tick(at(2024, 3, 10, 12, 2, 0), &cancel).rotations, 1);

    let day = tmp.path().join("Lobby/2024/3/10");
    assert_eq!(
        journal.borrow().opened,
        vec![
            day.join("2024-03-10 12_00_00.avi"),
            day.join("2024-03-10 12_01_00.avi"),
            day.join("2024-03-10 12_02_00.avi"),
        ]
    );
    assert_eq!(recorder.registry().statuses()[0].session.files_saved, 2);
    // one frame per tick, none lost across rotations
    assert_eq!(journal.borrow().frames.len(), 4);
}

#[test]
fn failed_rotation_stops_only_that_camera() {
    let tmp = TempDir::new().expect("tempdir");
    let lobby = Stream::new((640, 480));
    let yard = Stream::new((640, 480));
    let backend = FakeBackend::default()
        .with_stream("rtsp://lobby", &lobby)
        .with_stream("rtsp://yard", &yard);
    let start = at(2024, 3, 10, 23, 59, 30);
    let mut recorder = Recorder::new(backend, &config(&tmp), start).expect("recorder");
    assert_eq!(
        recorder.start_cameras(
            &[spec("Lobby", "rtsp://lobby"), spec("Yard", "rtsp://yard")],
            start
        ),
        2
    );
    fs::write(tmp.path().join("Lobby/2024/3/11"), b"in the way").expect("blocker");
    let cancel = CancellationToken::new();

    let summary = recorder.tick(at(2024, 3, 11, 0, 0, 30), &cancel);
    assert_eq!(summary.stopped, vec![id("Lobby")]);
    assert_eq!(summary.rotations, 1);
    assert_eq!(recorder.registry().identities(), vec![id("Yard")]);
    assert!(
        !recorder
            .schedule()
            .clone()
            .due(at(2024, 3, 12, 0, 0, 0))
            .contains(&Job::Rotate(id("Lobby")))
    );
    assert!(tmp.path().join("Yard/2024/3/11/2024-03-11 00_00_30.avi").is_file());
}

#[test]
fn daily_sweep_spares_open_segments() {
    let tmp = TempDir::new().expect("tempdir");
    let old_dir = tmp.path().join("Lobby/2024/3/1");
    fs::create_dir_all(&old_dir).expect("mkdir");
    let expired = old_dir.join("2024-03-01 08_00_00.avi");
    fs::write(&expired, b"old").expect("write");

    let lobby = Stream::new((640, 480));
    let backend = FakeBackend::default().with_stream("rtsp://lobby", &lobby);
    let mut cfg = config(&tmp);
    cfg.segment_length = Duration::from_secs(30 * 24 * 60 * 60);
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &cfg, start).expect("recorder");
    recorder
        .add_camera(&spec("Lobby", "rtsp://lobby"), start)
        .expect("camera starts");
    let cancel = CancellationToken::new();

    assert!(recorder.tick(at(2024, 3, 10, 23, 54, 59), &cancel).sweeps.is_empty());
    let summary = recorder.tick(at(2024, 3, 13, 23, 55, 0), &cancel);
    assert_eq!(summary.sweeps.len(), 1);
    let report = &summary.sweeps[0];
    assert_eq!(report.deleted, vec![expired.clone()]);
    assert_eq!(report.skipped.len(), 1);
    assert!(!expired.exists());
    assert!(
        tmp.path()
            .join("Lobby/2024/3/10/2024-03-10 12_00_00.avi")
            .is_file()
    );
}

#[test]
fn cancellation_stops_polling_and_releases_everything() {
    let tmp = TempDir::new().expect("tempdir");
    let lobby = Stream::new((640, 480));
    let backend = FakeBackend::default().with_stream("rtsp://lobby", &lobby);
    let journal = backend.journal.clone();
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &config(&tmp), start).expect("recorder");
    recorder
        .add_camera(&spec("Lobby", "rtsp://lobby"), start)
        .expect("camera starts");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = recorder.tick(at(2024, 3, 10, 12, 0, 1), &cancel);
    assert_eq!(summary.frames_written, 0);

    let statuses = recorder.run(cancel);
    assert_eq!(statuses.len(), 1);
    let journal = journal.borrow();
    assert!(journal.frames.is_empty());
    assert_eq!(journal.released.len(), 1);
    assert_eq!(journal.captures_released, 1);
}

#[test]
fn unschedulable_segment_length_leaves_the_camera_out() {
    let tmp = TempDir::new().expect("tempdir");
    let lobby = Stream::new((640, 480));
    let backend = FakeBackend::default().with_stream("rtsp://lobby", &lobby);
    let journal = backend.journal.clone();
    let mut cfg = config(&tmp);
    cfg.segment_length = humantime::parse_duration("300000years").expect("duration");
    let start = at(2024, 3, 10, 12, 0, 0);
    let mut recorder = Recorder::new(backend, &cfg, start).expect("recorder");

    let err = recorder
        .add_camera(&spec("Lobby", "rtsp://lobby"), start)
        .expect_err("interval overflows the calendar");
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(recorder.registry().is_empty());
    assert_eq!(recorder.schedule().len(), 1);
    assert!(journal.borrow().opened.is_empty());
}
