//! SIGTERM handling. Kept in its own test binary because it signals the
//! whole test process.

#![cfg(unix)]

use std::time::Duration;

use inbox_responder::shutdown::ShutdownSignal;

#[tokio::test]
async fn sigterm_is_caught_instead_of_killing_the_process() {
    let shutdown = ShutdownSignal::install().unwrap();

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), shutdown.recv())
        .await
        .expect("SIGTERM was not observed")
        .unwrap();
}
