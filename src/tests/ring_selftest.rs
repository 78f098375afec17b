use crate::ring::SharedRingBuffer;

fn exercise_wraparound(ring: &SharedRingBuffer) {
    let first: Vec<u8> = (0..7).collect();
    assert_eq!(ring.push(&first, None), 7);
    let mut out = [0u8; 7];
    assert_eq!(ring.pop(&mut out), 7);
    assert_eq!(out.to_vec(), first);

    let second: Vec<u8> = (100..108).collect();
    assert_eq!(ring.push(&second, None), 8);
    assert_eq!(ring.available_read(), 8);
    assert_eq!(ring.write_space(), 2);

    let mut out = [0u8; 8];
    assert_eq!(ring.pop(&mut out), 8);
    assert_eq!(out.to_vec(), second);
}

#[test]
fn local_ring_wraps_around() {
    exercise_wraparound(&SharedRingBuffer::new_local(10));
}

#[test]
fn shared_ring_wraps_around() {
    let ring = SharedRingBuffer::new_shared(10).expect("anonymous mapping");
    assert!(ring.is_shared());
    assert_eq!(ring.capacity_bytes(), 10);
    exercise_wraparound(&ring);
}

#[test]
fn push_stops_at_capacity() {
    let ring = SharedRingBuffer::new_local(4);
    assert_eq!(ring.push(&[1, 2, 3], None), 3);
    assert_eq!(ring.push(&[4, 5, 6], None), 1);
    assert_eq!(ring.push(&[7], None), 0);
    assert_eq!(ring.fill_ratio(), 1.0);
}

#[test]
fn reset_discards_unread_bytes() {
    let ring = SharedRingBuffer::new_local(16);
    ring.push(&[9; 12], Some(42));
    assert_eq!(ring.last_timestamp_ns(), 42);

    let mut out = [0u8; 4];
    assert_eq!(ring.pop(&mut out), 4);
    assert_eq!(ring.reset(), 8);
    assert_eq!(ring.available_read(), 0);
    assert_eq!(ring.pop(&mut out), 0);
    assert_eq!(ring.reset(), 0);

    ring.push(&[1, 2], None);
    assert_eq!(ring.pop(&mut out), 2);
    assert_eq!(&out[..2], &[1, 2]);
}

#[test]
fn discard_skips_bytes() {
    let ring = SharedRingBuffer::new_local(8);
    ring.push(&[1, 2, 3, 4, 5], None);
    assert_eq!(ring.discard(3), 3);
    let mut out = [0u8; 8];
    assert_eq!(ring.pop(&mut out), 2);
    assert_eq!(&out[..2], &[4, 5]);
    assert_eq!(ring.discard(3), 0);
}

#[test]
fn pop_racing_reset_never_returns_torn_chunks() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const CHUNK: usize = 8;
    let ring = Arc::new(SharedRingBuffer::new_local(CHUNK * 4));
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let ring = Arc::clone(&ring);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for n in 0..20_000u32 {
                let value = (n % 251) as u8 + 1;
                while ring.push(&[value; CHUNK], None) == 0 {
                    std::thread::yield_now();
                }
                if n % 7 == 0 {
                    ring.reset();
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut out = [0u8; CHUNK];
    let mut accepted = 0usize;
    while !done.load(Ordering::Acquire) || ring.available_read() > 0 {
        let got = ring.pop(&mut out);
        if got > 0 {
            assert_eq!(got, CHUNK);
            assert!(out.iter().all(|&b| b == out[0]), "torn chunk {out:?}");
            accepted += 1;
        }
    }
    producer.join().unwrap();
    assert!(accepted > 0);
}
