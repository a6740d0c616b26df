use std::thread;
use std::time::{Duration, Instant};

use alicerce::cmd::Shell;
use alicerce::runner::CancelToken;

#[test]
fn sigint_cancels_the_run() {
    let token = CancelToken::from_signals().unwrap();
    assert!(!token.is_cancelled());

    Shell::new(Duration::from_secs(5))
        .run("kill", &["-INT", &std::process::id().to_string()])
        .unwrap();

    let started = Instant::now();
    while !token.is_cancelled() && started.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(token.is_cancelled());
}
