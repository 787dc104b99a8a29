use std::net::SocketAddr;

use proptest::prelude::*;
use tcp_demux::{FlowTable, FlowTableConfig, OverlapPolicy, TcpFlags};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn client() -> SocketAddr {
    "192.168.1.10:51000".parse().expect("client address")
}

fn server() -> SocketAddr {
    "192.168.1.1:443".parse().expect("server address")
}

/// Splits `data` into chunks of `sizes`, each tagged with its starting
/// sequence number after the SYN at `isn`.
fn chunks<'a>(data: &'a [u8], sizes: &[usize], isn: u32) -> Vec<(u32, &'a [u8])> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut offset = 0usize;
    for &size in sizes {
        let seq = isn.wrapping_add(1).wrapping_add(offset as u32);
        out.push((seq, &data[offset..offset + size]));
        offset += size;
    }
    out
}

/// Feeds the chunks in `order` after a SYN and returns every byte delivered,
/// including whatever a final drain offers.
fn deliver(table: &mut FlowTable, isn: u32, chunks: &[(u32, &[u8])], order: &[usize]) -> Vec<u8> {
    let (src, dst) = (client(), server());
    table.receive(0, &src, &dst, isn, &[], TcpFlags::SYN).consume(0);

    let mut out = Vec::new();
    for (step, &idx) in order.iter().enumerate() {
        let (seq, bytes) = chunks[idx];
        let view = table.receive(step as u64, &src, &dst, seq, bytes, TcpFlags::ACK);
        out.extend_from_slice(view.data());
        let len = view.len();
        view.consume(len);
    }

    table.finish(0, |_, _, view| {
        out.extend_from_slice(view.data());
        let len = view.len();
        view.consume(len);
    });
    out
}

fn chunked_stream() -> impl Strategy<Value = (Vec<u8>, Vec<usize>, Vec<usize>)> {
    prop::collection::vec(1usize..16, 1..24).prop_flat_map(|sizes| {
        let total: usize = sizes.iter().sum();
        let order: Vec<usize> = (0..sizes.len()).collect();
        (
            prop::collection::vec(any::<u8>(), total),
            Just(sizes),
            Just(order).prop_shuffle(),
        )
    })
}

fn chunked_stream_with_repeats() -> impl Strategy<Value = (Vec<u8>, Vec<usize>, Vec<usize>)> {
    prop::collection::vec(1usize..16, 1..24).prop_flat_map(|sizes| {
        let total: usize = sizes.iter().sum();
        let order: Vec<usize> = (0..sizes.len()).chain(0..sizes.len()).collect();
        (
            prop::collection::vec(any::<u8>(), total),
            Just(sizes),
            Just(order).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn any_arrival_order_yields_original_stream(
        (data, sizes, order) in chunked_stream(),
        isn in any::<u32>(),
    ) {
        let mut table = FlowTable::new();
        let chunks = chunks(&data, &sizes, isn);
        prop_assert_eq!(deliver(&mut table, isn, &chunks, &order), data.clone());
        prop_assert_eq!(table.stats().cached_bytes, 0);
    }

    #[test]
    fn retransmitted_fragments_are_delivered_once(
        (data, sizes, order) in chunked_stream_with_repeats(),
        isn in any::<u32>(),
    ) {
        let mut table = FlowTable::new();
        let chunks = chunks(&data, &sizes, isn);
        prop_assert_eq!(deliver(&mut table, isn, &chunks, &order), data.clone());
    }

    #[test]
    fn keep_non_overlapping_policy_also_reassembles(
        (data, sizes, order) in chunked_stream_with_repeats(),
        isn in any::<u32>(),
    ) {
        let mut table = FlowTable::with_config(FlowTableConfig {
            overlap_policy: OverlapPolicy::KeepNonOverlapping,
            ..FlowTableConfig::default()
        })
        .expect("valid config");
        let chunks = chunks(&data, &sizes, isn);
        prop_assert_eq!(deliver(&mut table, isn, &chunks, &order), data.clone());
    }
}

#[test]
fn stream_wraps_past_max_sequence() {
    init_tracing();
    let (src, dst) = (client(), server());
    let mut table = FlowTable::new();
    let isn = 0xFFFF_FFFA;

    table.receive(0, &src, &dst, isn, &[], TcpFlags::SYN).consume(0);
    // [0xFFFFFFFF, 3) arrives before [0xFFFFFFFB, 0xFFFFFFFF).
    assert!(
        table
            .receive(1, &src, &dst, 0xFFFF_FFFF, b"5678", TcpFlags::ACK)
            .is_empty()
    );

    let view = table.receive(2, &src, &dst, 0xFFFF_FFFB, b"1234", TcpFlags::ACK);
    assert_eq!(view.data(), b"12345678");
    assert!(view.is_cached());
    view.consume(8);
    assert_eq!(table.lookup(&src, &dst).expect("flow").end(), 3);
}

#[test]
fn full_connection_lifecycle() {
    init_tracing();
    let (c, s) = (client(), server());
    let mut table = FlowTable::new();

    let syn = table.receive(0, &c, &s, 1000, &[], TcpFlags::SYN);
    let session = syn.session_id();
    assert_ne!(session, 0);
    syn.consume(0);

    table
        .receive(1, &s, &c, 5000, &[], TcpFlags::SYN | TcpFlags::ACK)
        .consume(0);
    let ack = table.receive(2, &c, &s, 1001, &[], TcpFlags::ACK);
    assert_eq!(ack.session_id(), 0);
    ack.consume(0);

    // Request arrives in two pieces, second piece first.
    assert!(
        table
            .receive(3, &c, &s, 1005, b"/ HTTP/1.1\r\n\r\n", TcpFlags::ACK | TcpFlags::PSH)
            .is_empty()
    );
    let request = table.receive(4, &c, &s, 1001, b"GET ", TcpFlags::ACK);
    assert_eq!(request.data(), b"GET / HTTP/1.1\r\n\r\n");
    let len = request.len();
    request.consume(len);

    let response = table.receive(5, &s, &c, 5001, b"HTTP/1.1 200 OK\r\n\r\n", TcpFlags::ACK | TcpFlags::FIN);
    assert!(response.is_final());
    assert_eq!(response.session_id(), session);
    let len = response.len();
    response.consume(len);

    let fin = table.receive(6, &c, &s, 1019, &[], TcpFlags::FIN | TcpFlags::ACK);
    assert!(fin.is_final());
    assert!(fin.is_empty());
    fin.consume(0);

    let entry = table.find_entry(&c, &s).expect("entry");
    assert!(entry.is_finished());

    // Retransmitted response shortly after close is ignored.
    let late = table.receive(7, &s, &c, 5001, b"HTTP/1.1 200 OK\r\n\r\n", TcpFlags::ACK);
    assert_eq!(late.session_id(), session);
    assert!(late.is_empty());
    late.consume(0);

    // Port reuse opens a new session on the same entry.
    let reopened = table.receive(8, &c, &s, 90_000, &[], TcpFlags::SYN);
    assert!(reopened.session_id() > session);
    reopened.consume(0);
    assert_eq!(table.len(), 1);

    let stats = table.stats();
    assert_eq!(stats.sessions_started, 2);
    assert_eq!(stats.drops.bare_ack, 1);
    assert_eq!(stats.drops.late_segment, 1);
    assert_eq!(stats.cached_bytes, 0);
}

#[test]
fn reset_closes_only_its_direction() {
    init_tracing();
    let (c, s) = (client(), server());
    let mut table = FlowTable::new();

    table.receive(0, &c, &s, 10, &[], TcpFlags::SYN).consume(0);
    table
        .receive(0, &s, &c, 20, &[], TcpFlags::SYN | TcpFlags::ACK)
        .consume(0);

    let rst = table.receive(1, &c, &s, 11, &[], TcpFlags::RST);
    assert!(rst.is_final());
    rst.consume(0);

    let entry = table.find_entry(&c, &s).expect("entry");
    assert!(!entry.is_finished());
    assert!(table.lookup(&c, &s).expect("c->s").is_finished());
    assert!(!table.lookup(&s, &c).expect("s->c").is_finished());

    let view = table.receive(2, &s, &c, 21, b"bye", TcpFlags::ACK);
    assert_eq!(view.data(), b"bye");
    view.consume(3);
}

#[test]
fn end_of_capture_flush_fills_small_gaps() {
    init_tracing();
    let (c, s) = (client(), server());
    let mut table = FlowTable::new();

    table.receive(0, &c, &s, 99, &[], TcpFlags::SYN).consume(0);
    table.receive(1, &c, &s, 100, b"abc", TcpFlags::ACK).consume(3);
    // Bytes [103,105) were never captured.
    assert!(table.receive(2, &c, &s, 105, b"fgh", TcpFlags::ACK).is_empty());

    let mut flushed = Vec::new();
    table.finish(4, |src, _, view| {
        if *src == c {
            flushed.extend_from_slice(view.data());
        }
        let len = view.len();
        view.consume(len);
    });

    assert_eq!(flushed, b"\0\0fgh");
}
