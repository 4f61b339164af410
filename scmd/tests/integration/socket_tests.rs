use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};

use scm_common::auth::{HmacKeyDerivation, TransactionKey, random_nonce, unix_now};
use scm_common::errors::ErrorKind;
use scm_common::protocol::{Envelope, ErrorBody, Payload, Request, Response};
use scm_common::types::AnalysisState;

use crate::common::{SECRET, TestInstall, init_test_logging};

struct RunningDaemon {
    child: Child,
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start(install: &TestInstall) -> RunningDaemon {
    let child = install
        .command()
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start scmd");
    let daemon = RunningDaemon { child };

    let deadline = Instant::now() + Duration::from_secs(20);
    while !install.socket_path.exists() {
        assert!(Instant::now() < deadline, "daemon never created its socket");
        std::thread::sleep(Duration::from_millis(50));
    }
    daemon
}

fn mint() -> String {
    let derivation = HmacKeyDerivation::new(SECRET.as_bytes()).unwrap();
    TransactionKey::mint(&derivation, random_nonce(), unix_now() as u32).encode()
}

fn exchange(stream: &mut UnixStream, reader: &mut BufReader<UnixStream>, line: &str) -> Response {
    stream.write_all(line.as_bytes()).unwrap();
    stream.write_all(b"\n").unwrap();
    let mut reply = String::new();
    reader.read_line(&mut reply).unwrap();
    serde_json::from_str(&reply).unwrap()
}

fn connect(install: &TestInstall) -> (UnixStream, BufReader<UnixStream>) {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        match UnixStream::connect(&install.socket_path) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(Duration::from_secs(20)))
                    .unwrap();
                let reader = BufReader::new(stream.try_clone().unwrap());
                return (stream, reader);
            }
            Err(e) => {
                assert!(Instant::now() < deadline, "connect failed: {e}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[test]
fn test_daemon_answers_over_socket() {
    init_test_logging();
    crate::test_log!("TEST START: test_daemon_answers_over_socket");

    let install = TestInstall::new();
    let _daemon = start(&install);
    let (mut stream, mut reader) = connect(&install);

    let request = serde_json::to_string(&Envelope {
        transaction_key: mint(),
        request: Request::GetArchiveRepositoryRootPath,
    })
    .unwrap();
    let expected = install.dir.path().join("home/var/scm-archive");
    assert_eq!(
        exchange(&mut stream, &mut reader, &request),
        Response::Ok(Payload::Path {
            path: expected.display().to_string()
        })
    );

    let request = serde_json::to_string(&Envelope {
        transaction_key: mint(),
        request: Request::GetAnalysisStatus {
            key: "job-1".into(),
        },
    })
    .unwrap();
    assert_eq!(
        exchange(&mut stream, &mut reader, &request),
        Response::Ok(Payload::State {
            state: AnalysisState::NotRunning
        })
    );

    crate::test_log!("TEST PASS: test_daemon_answers_over_socket");
}

#[test]
fn test_daemon_rejects_bad_key() {
    init_test_logging();
    let install = TestInstall::new();
    let _daemon = start(&install);
    let (mut stream, mut reader) = connect(&install);

    let request = serde_json::to_string(&Envelope {
        transaction_key: "bm90IGEga2V5".into(),
        request: Request::GetArchiveRepositoryRootPath,
    })
    .unwrap();
    match exchange(&mut stream, &mut reader, &request) {
        Response::Error(ErrorBody { kind, .. }) => {
            assert_eq!(kind, ErrorKind::AuthenticationFailure)
        }
        other => panic!("expected an authentication failure, got {other:?}"),
    }

    match exchange(&mut stream, &mut reader, "{\"op\":") {
        Response::Error(ErrorBody { kind, .. }) => assert_eq!(kind, ErrorKind::Internal),
        other => panic!("expected a protocol error, got {other:?}"),
    }
}
