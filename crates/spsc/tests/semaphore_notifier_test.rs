use serial_test::serial;
use spsc::{Reader, Semaphore, SemaphoreError, SemaphoreNotifier, SpscError, WriteOptions, Writer};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SEM_NAME: &str = "/spsc_test_writer_notify";

fn fresh_semaphore() -> SemaphoreNotifier {
    let _ = Semaphore::unlink(SEM_NAME);
    SemaphoreNotifier::open(SEM_NAME).expect("Failed to create semaphore")
}

#[test]
#[serial]
fn test_semaphore_posted_on_publish_and_close() {
    let notifier = fresh_semaphore();
    let observer = Semaphore::open(SEM_NAME).unwrap();

    let region = spsc::allocate(8).unwrap();
    let mut writer = Writer::with_notifier(Arc::clone(&region), notifier).unwrap();

    writer.write(&[1, 2], WriteOptions::default()).unwrap();
    assert_eq!(observer.value().unwrap(), 1, "one post per publish");

    writer.close().unwrap();
    assert_eq!(observer.value().unwrap(), 2, "close posts as well");

    let _ = Semaphore::unlink(SEM_NAME);
}

#[test]
#[serial]
fn test_wait_timeout_without_post() {
    let notifier = fresh_semaphore();
    let result = notifier
        .semaphore()
        .wait_timeout(Duration::from_millis(20));
    assert!(matches!(result, Err(SemaphoreError::Timeout)));
    let _ = Semaphore::unlink(SEM_NAME);
}

/// Consumer sleeps on the semaphore instead of the futex and retries its
/// non-blocking reads each time the writer posts.
#[test]
#[serial]
fn test_semaphore_driven_consumer() {
    const TOTAL: usize = 5_000;

    let notifier = fresh_semaphore();
    let wakeups = Semaphore::open(SEM_NAME).unwrap();

    let region = spsc::allocate(64).unwrap();
    let mut writer = Writer::with_notifier(Arc::clone(&region), notifier).unwrap();
    let mut reader = Reader::new(Arc::clone(&region)).unwrap();

    let producer = thread::spawn(move || {
        for i in 0..TOTAL {
            writer.write(&[i as u8], WriteOptions::default()).unwrap();
        }
        writer.close().unwrap();
    });

    let mut seq = 0usize;
    let mut buf = [0u8; 32];
    loop {
        match reader.read_into(&mut buf, true) {
            Ok(0) => break,
            Ok(n) => {
                for &b in &buf[..n] {
                    assert_eq!(b, seq as u8);
                    seq += 1;
                }
            }
            Err(SpscError::WouldBlock) => {
                wakeups
                    .wait_timeout(Duration::from_secs(5))
                    .expect("writer never posted");
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    producer.join().expect("Producer thread panicked");
    assert_eq!(seq, TOTAL);
    let _ = Semaphore::unlink(SEM_NAME);
}
