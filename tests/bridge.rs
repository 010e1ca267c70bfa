use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use arcvfs::StreamBridge;

/// Reader that pulls in fixed small steps, pausing between them
fn read_slowly(reader: &mut impl Read, step: usize, pause: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; step];
    loop {
        let n = reader.read(&mut buf).expect("bridge read failed");
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn bridged_bytes_match_produced_bytes(
        data in proptest::collection::vec(any::<u8>(), 0..20_000),
        capacity in 1usize..4096,
        chunk in 1usize..2048,
        step in 1usize..1024,
    ) {
        let produced = data.clone();
        let mut reader = StreamBridge::spawn("prop", capacity, false, move |w| {
            for piece in produced.chunks(chunk) {
                w.write_all(piece)?;
            }
            Ok(())
        })
        .expect("failed to spawn bridge");

        let out = read_slowly(&mut reader, step, Duration::ZERO);
        prop_assert_eq!(out, data);
        prop_assert!(reader.completion().wait());
    }
}

#[test]
fn test_slow_reader_with_tiny_buffer() {
    let data: Vec<u8> = (0..5_000u32).map(|i| (i % 251) as u8).collect();
    let produced = data.clone();
    let mut reader = StreamBridge::spawn("slow", 1, false, move |w| {
        w.write_all(&produced)?;
        Ok(())
    })
    .expect("failed to spawn bridge");

    let out = read_slowly(&mut reader, 700, Duration::from_micros(50));
    assert_eq!(out, data);
}
