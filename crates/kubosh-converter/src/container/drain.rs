//! Drain synchronization
//!
//! Every run container gets a `preStop` hook that runs its job's drain script
//! and then waits for the other containers of the pod. Each container drops a
//! stamp file into a directory on the shared sys volume once its drain logic is
//! done; the hook only exits after one stamp per process exists, so the pod is
//! not torn down while any process is still draining.

use kubosh_common::k8s::{ExecAction, LifecycleHandler};

/// Directory collecting one stamp per drained container
pub const DRAIN_STAMPS_DIR: &str = "/var/vcap/sys/run/drain-stamps";

/// Seconds between stamp count checks
pub const DRAIN_POLL_SECONDS: u32 = 5;

/// `preStop` handler for `container` of `job` in an instance group running
/// `total_processes` processes
pub fn drain_handler(job: &str, container: &str, total_processes: usize) -> LifecycleHandler {
    LifecycleHandler {
        exec: ExecAction {
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                drain_script(job, container, total_processes),
            ],
        },
    }
}

/// Shell script run by [`drain_handler`].
///
/// Drain script protocol: a non-zero exit counts as drained, a negative
/// output `-N` means sleep N seconds and ask again, a non-negative output `N`
/// means sleep N seconds and finish.
pub fn drain_script(job: &str, container: &str, total_processes: usize) -> String {
    let drain = format!("{}/{}/bin/drain", crate::JOBS_DIR, job);
    format!(
        r#"set -u
stamps={stamps}
drain_done() {{
  mkdir -p "$stamps"
  touch "$stamps/{container}"
  while [ "$(ls -1 "$stamps" | wc -l)" -lt {total} ]; do
    sleep {poll}
  done
  exit 0
}}
if [ ! -x {drain} ]; then
  drain_done
fi
while true; do
  out=$({drain} job_shutdown hash_unchanged)
  status=$?
  if [ "$status" -ne 0 ]; then
    echo "drain script for {job} failed with exit code $status: $out" >&2
    drain_done
  fi
  case "$out" in
    -*) sleep "${{out#-}}" ;;
    *) sleep "$out"; drain_done ;;
  esac
done
"#,
        stamps = DRAIN_STAMPS_DIR,
        container = container,
        total = total_processes,
        poll = DRAIN_POLL_SECONDS,
        drain = drain,
        job = job,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_every_process() {
        let script = drain_script("redis-server", "redis-server-redis", 3);
        assert!(script.contains("-lt 3 ]"));
        assert!(script.contains("sleep 5"));
        assert!(script.contains("touch \"$stamps/redis-server-redis\""));
        assert!(script.contains("exit 0"));
    }

    #[test]
    fn runs_job_drain_script() {
        let script = drain_script("redis-server", "redis-server-redis", 1);
        assert!(script.contains("[ ! -x /var/vcap/jobs/redis-server/bin/drain ]"));
        assert!(script.contains("out=$(/var/vcap/jobs/redis-server/bin/drain job_shutdown hash_unchanged)"));
        assert!(script.contains("sleep \"${out#-}\""));
    }

    #[test]
    fn handler_runs_through_shell() {
        let handler = drain_handler("nats", "nats-nats", 2);
        assert_eq!(handler.exec.command[0], "/bin/sh");
        assert_eq!(handler.exec.command[1], "-c");
        assert!(handler.exec.command[2].contains(DRAIN_STAMPS_DIR));
    }

    #[cfg(unix)]
    mod shell {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::process::Command;
        use std::thread;
        use std::time::{Duration, Instant};

        /// Point the script at `root` and poll every second
        fn localized(script: String, root: &Path) -> String {
            script
                .replace(DRAIN_STAMPS_DIR, &root.join("stamps").display().to_string())
                .replace(crate::JOBS_DIR, &root.join("jobs").display().to_string())
                .replace(&format!("sleep {}\n", DRAIN_POLL_SECONDS), "sleep 1\n")
        }

        fn install_drain(root: &Path, job: &str, body: &str) {
            let bin = root.join("jobs").join(job).join("bin");
            fs::create_dir_all(&bin).unwrap();
            let drain = bin.join("drain");
            fs::write(&drain, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&drain, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn run(script: String) -> (bool, Duration) {
            let start = Instant::now();
            let status = Command::new("/bin/sh").arg("-c").arg(script).status().unwrap();
            (status.success(), start.elapsed())
        }

        fn stamps(root: &Path) -> usize {
            fs::read_dir(root.join("stamps")).unwrap().count()
        }

        #[test]
        fn every_container_waits_for_the_slowest_drain() {
            let root = tempfile::tempdir().unwrap();
            let jobs = [("fast", 0), ("medium", 1), ("slow", 3)];
            for (job, seconds) in jobs {
                install_drain(root.path(), job, &format!("echo {}", seconds));
            }

            let handles: Vec<_> = jobs
                .iter()
                .map(|(job, _)| {
                    let script = localized(drain_script(job, &format!("{job}-main"), jobs.len()), root.path());
                    thread::spawn(move || run(script))
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            for (success, elapsed) in results {
                assert!(success);
                assert!(elapsed >= Duration::from_secs(3), "exited after {elapsed:?}");
            }
            assert_eq!(stamps(root.path()), 3);
        }

        #[test]
        fn negative_output_asks_again() {
            let root = tempfile::tempdir().unwrap();
            install_drain(
                root.path(),
                "redis",
                r#"if [ -f "$0.asked" ]; then echo 0; else touch "$0.asked"; echo -1; fi"#,
            );

            let (success, elapsed) = run(localized(drain_script("redis", "redis-main", 1), root.path()));
            assert!(success);
            assert!(elapsed >= Duration::from_secs(1), "exited after {elapsed:?}");
            assert!(root.path().join("jobs/redis/bin/drain.asked").exists());
            assert_eq!(stamps(root.path()), 1);
        }

        #[test]
        fn failing_drain_counts_as_drained() {
            let root = tempfile::tempdir().unwrap();
            install_drain(root.path(), "redis", "echo busy; exit 3");

            let (success, elapsed) = run(localized(drain_script("redis", "redis-main", 1), root.path()));
            assert!(success);
            assert!(elapsed < Duration::from_secs(5), "exited after {elapsed:?}");
            assert_eq!(stamps(root.path()), 1);
        }

        #[test]
        fn missing_drain_stamps_immediately() {
            let root = tempfile::tempdir().unwrap();

            let (success, _) = run(localized(drain_script("nats", "nats-main", 1), root.path()));
            assert!(success);
            assert_eq!(stamps(root.path()), 1);
        }
    }
}
