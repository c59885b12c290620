// tests/platform.rs

//! End-to-end scenarios over the public surface: interrupting a piped
//! shell command, atomic rename, and a pty job echoing bytes back.

use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use edpal::config::PalConfig;
use edpal::job::shell::{call_shell, ShellIo};
use edpal::job::{channel::ChanPart, JobIo, JobOptions, JobTable};

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

#[test_log::test]
fn interrupt_stops_a_piped_shell_command() {
    edpal::signal::install_signal_handlers();
    let config = PalConfig::default();

    // The interrupt flag is already up when the command starts; the
    // runner must notice, signal the child and come back promptly.
    edpal::signal::set_got_int(true);
    let started = Instant::now();
    let result = call_shell(&config, Some("sleep 30"), &ShellIo::Piped { input: None }, None, None)
        .expect("call_shell failed");
    edpal::signal::set_got_int(false);

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "interrupt did not stop the command"
    );
    assert_eq!(result.code, 130, "expected 128+SIGINT");
}

#[test_log::test]
fn rename_replaces_target_and_keeps_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let from = dir.path().join("draft.txt");
    let to = dir.path().join("final.txt");
    std::fs::write(&from, b"payload").expect("write source");
    std::fs::write(&to, b"stale").expect("write target");
    std::fs::set_permissions(&from, std::fs::Permissions::from_mode(0o640)).expect("chmod");

    edpal::fs::rename(&from, &to).expect("rename failed");

    assert!(!from.exists(), "source must be gone");
    assert_eq!(std::fs::read(&to).expect("read target"), b"payload");
    assert_eq!(edpal::fs::get_perm(&to).expect("perm") & 0o777, 0o640);
    // No placeholder or temporary left behind.
    assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 1);
}

#[test_log::test]
fn pty_job_round_trips_bytes() {
    edpal::signal::install_signal_handlers();
    let config = PalConfig::default();
    let mut jobs = JobTable::new();
    let opts = JobOptions {
        io_in: JobIo::Pty,
        io_out: JobIo::Pty,
        io_err: JobIo::Pty,
        ..JobOptions::default()
    };
    let id = jobs
        .start(&config, &["cat".to_string()], &opts)
        .expect("job start failed");

    {
        let chan = jobs
            .get_mut(id)
            .and_then(|j| j.channel.as_mut())
            .expect("pty job has a channel");
        chan.write_input(b"hello\n").expect("write to pty");

        let stop = deadline();
        let mut collected = Vec::new();
        while !collected.windows(5).any(|w| w == b"hello") {
            assert!(Instant::now() < stop, "no echo from the pty job");
            collected.extend(chan.read_output(ChanPart::Out).expect("read from pty"));
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    jobs.signal(id, "term").expect("signal job");
    let stop = deadline();
    loop {
        jobs.detect_ended_jobs();
        match jobs.get(id) {
            Some(job) if job.status_name() == "dead" => break,
            _ => {
                assert!(Instant::now() < stop, "job did not end");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    jobs.clear(id);
    assert_eq!(jobs.running_count(), 0);
}
