//! Frame decoder behaviour on realistic and randomized serial streams.

use std::sync::Arc;

use meshtap::meshtastic::framer::{
    encode_frame, Crc16Check, FrameCheck, FrameDecoder, NoCheck, DEFAULT_MAX_PAYLOAD, START1,
};
use proptest::prelude::*;

fn decoder(check: Arc<dyn FrameCheck>) -> FrameDecoder {
    FrameDecoder::new(check, DEFAULT_MAX_PAYLOAD)
}

fn feed_in_chunks(dec: &mut FrameDecoder, wire: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for piece in wire.chunks(chunk.max(1)) {
        dec.push(piece);
        out.extend(dec.drain().into_iter().map(|f| f.payload.to_vec()));
    }
    out
}

#[test]
fn boot_log_then_frames_then_truncated_tail() {
    let mut wire = b"INFO  | ??:??:?? 2 [Main] Power: on\r\n".to_vec();
    wire.extend(encode_frame(b"one", &NoCheck));
    wire.extend(encode_frame(b"two", &NoCheck));
    let third = encode_frame(b"three", &NoCheck);
    wire.extend(&third[..4]);

    let mut dec = decoder(Arc::new(NoCheck));
    let frames = feed_in_chunks(&mut dec, &wire, 7);
    assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    assert_eq!(dec.buffered(), 4, "incomplete frame waits for more bytes");

    dec.push(&third[4..]);
    assert_eq!(&dec.next_frame().expect("third").payload[..], b"three");
}

#[test]
fn zero_length_frame_is_skipped() {
    let mut wire = vec![0x94, 0xC3, 0x00, 0x00];
    wire.extend(encode_frame(b"after", &Crc16Check));
    let mut dec = decoder(Arc::new(Crc16Check));
    dec.push(&wire);
    let frames = dec.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].payload[..], b"after");
}

#[test]
fn corrupted_payload_is_rejected_with_crc() {
    let mut bad = encode_frame(b"corrupt me", &Crc16Check);
    bad[6] ^= 0x01;
    let mut wire = bad;
    wire.extend(encode_frame(b"intact", &Crc16Check));

    let mut dec = decoder(Arc::new(Crc16Check));
    dec.push(&wire);
    let frames = dec.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].payload[..], b"intact");
    assert!(dec.stats().checksum_failures >= 1);
}

proptest! {
    #[test]
    fn frames_survive_any_chunking(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..=DEFAULT_MAX_PAYLOAD), 1..6),
        chunk in 1usize..64,
        crc in any::<bool>(),
    ) {
        let check: Arc<dyn FrameCheck> = if crc { Arc::new(Crc16Check) } else { Arc::new(NoCheck) };
        let wire: Vec<u8> = payloads
            .iter()
            .flat_map(|p| encode_frame(p, check.as_ref()))
            .collect();
        let mut dec = decoder(Arc::clone(&check));
        let frames = feed_in_chunks(&mut dec, &wire, chunk);
        prop_assert_eq!(frames, payloads);
        prop_assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn garbage_prefix_is_resynchronized(
        garbage in prop::collection::vec(any::<u8>().prop_filter("no marker", |b| *b != START1), 0..200),
        payload in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let mut wire = garbage.clone();
        wire.extend(encode_frame(&payload, &Crc16Check));
        let mut dec = decoder(Arc::new(Crc16Check));
        dec.push(&wire);
        let frames = dec.drain();
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(&frames[0].payload[..], &payload[..]);
        prop_assert_eq!(dec.stats().resync_bytes, garbage.len() as u64);
    }

    #[test]
    fn single_inserted_byte_only_costs_the_frame_it_hits(
        payloads in prop::collection::vec(
            prop::collection::vec(any::<u8>().prop_filter("no marker", |b| *b != START1), 1..64),
            2..8,
        ),
        junk in any::<u8>(),
        at in any::<prop::sample::Index>(),
    ) {
        let mut starts = Vec::new();
        let mut wire = Vec::new();
        for p in &payloads {
            starts.push(wire.len());
            wire.extend(encode_frame(p, &Crc16Check));
        }
        let pos = at.index(wire.len());
        wire.insert(pos, junk);
        // The radio keeps talking: enough quiet bytes follow to complete any
        // bogus length the corruption may have produced.
        wire.extend(std::iter::repeat(0u8).take(DEFAULT_MAX_PAYLOAD + 8));

        let mut dec = decoder(Arc::new(Crc16Check));
        dec.push(&wire);
        let decoded: Vec<Vec<u8>> = dec.drain().into_iter().map(|f| f.payload.to_vec()).collect();

        let hit = starts.iter().rposition(|&s| s < pos);
        let before = hit.map(|h| &payloads[..h]).unwrap_or(&[]);
        let after = match hit {
            Some(h) => &payloads[h + 1..],
            None => &payloads[..],
        };
        prop_assert!(decoded.starts_with(before));
        prop_assert!(decoded.ends_with(after));
        prop_assert!(decoded.len() <= before.len() + after.len() + 1);
    }

    #[test]
    fn arbitrary_bytes_never_yield_oversize_frames(
        noise in prop::collection::vec(any::<u8>(), 0..2048),
        max in 1usize..64,
    ) {
        let mut dec = FrameDecoder::new(Arc::new(NoCheck), max);
        dec.push(&noise);
        for frame in dec.drain() {
            prop_assert!(!frame.payload.is_empty());
            prop_assert!(frame.payload.len() <= max);
        }
    }
}
