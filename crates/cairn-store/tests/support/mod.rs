//! Shared scaffolding: run the real daemon against a scratch socket.
#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

pub struct StoreProcess {
    child: Child,
    pub socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl StoreProcess {
    /// Spawn `cairn-store -s <scratch>/cairn.sock` and wait for the socket
    /// to appear.
    pub fn spawn() -> Self {
        let dir = tempfile::tempdir().expect("scratch dir");
        let socket = dir.path().join("cairn.sock");
        let child = Command::new(env!("CARGO_BIN_EXE_cairn-store"))
            .arg("-s")
            .arg(&socket)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn cairn-store");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket.exists() {
            assert!(
                Instant::now() < deadline,
                "store did not come up within 5s"
            );
            std::thread::sleep(Duration::from_millis(5));
        }

        Self {
            child,
            socket,
            _dir: dir,
        }
    }

    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Wait up to `timeout` for the daemon to exit on its own.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait().expect("try_wait") {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Assert the daemon died of a fatal error (non-zero exit) within a few
    /// seconds.
    pub fn assert_fatal_exit(&mut self) {
        let status = self
            .wait_for_exit(Duration::from_secs(5))
            .expect("store should have exited");
        assert!(
            !status.success(),
            "expected a fatal non-zero exit, got {status:?}"
        );
    }
}

impl Drop for StoreProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
