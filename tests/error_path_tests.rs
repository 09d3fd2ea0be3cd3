//! Error paths through the public API: malformed and inconsistent
//! inputs must be reported, never panic or partially apply.

use spv_relay::{header, tx, ChainParams, RelayError, SpvRelay};

#[test]
fn test_header_decode_rejects_wrong_sizes() {
    for size in [0usize, 1, 79, 81, 160] {
        let raw = vec![0u8; size];
        match header::decode(&raw) {
            Err(RelayError::MalformedHeader(got)) => assert_eq!(got, size),
            other => panic!("expected MalformedHeader, got {other:?}"),
        }
    }
}

#[test]
fn test_transaction_parser_never_reads_past_truncation() {
    let raw = hex::decode(
        "01000000019c2e0f24a03e72002a96acedb12a632e72b6b74c05dc3ceab1fe78237f886c48\
         010000000151ffffffff011027000000000000015100000000",
    )
    .unwrap();
    // the full buffer parses
    let parsed = tx::parse(&raw).unwrap();
    assert_eq!(parsed.inputs.len(), 1);
    assert_eq!(parsed.outputs.len(), 1);

    // every proper prefix fails cleanly
    for cut in 0..raw.len() {
        assert!(
            matches!(
                tx::parse(&raw[..cut]),
                Err(RelayError::TruncatedTransaction { .. })
            ),
            "prefix of {cut} bytes"
        );
    }
}

#[test]
fn test_segwit_flag_must_be_one() {
    // version, marker 0x00, flag 0x03
    let raw = [0x01, 0x00, 0x00, 0x00, 0x00, 0x03];
    assert_eq!(
        tx::parse(&raw),
        Err(RelayError::UnsupportedEncoding(0x03))
    );
}

#[test]
fn test_display_hash_parsing_errors() {
    assert!(matches!(
        header::from_display_hex("not hex at all"),
        Err(RelayError::MalformedHash(_))
    ));
    assert!(matches!(
        header::from_display_hex("00ff"),
        Err(RelayError::MalformedHash(_))
    ));
}

#[test]
fn test_uninitialized_relay_reports_not_initialized() {
    let relay = SpvRelay::new(ChainParams::mainnet());
    assert_eq!(relay.current_best_height(), Err(RelayError::NotInitialized));
    assert_eq!(relay.current_best_hash(), Err(RelayError::NotInitialized));
    assert_eq!(relay.header_at(0), Err(RelayError::NotInitialized));
    assert_eq!(
        relay.submit_headers(&[0u8; 32], &[0u8; 80]),
        Err(RelayError::NotInitialized)
    );
}

#[test]
fn test_submit_headers_rejects_unknown_anchor() {
    let raw = hex::decode(
        "0100000000000000000000000000000000000000000000000000000000000000\
         000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa\
         4b1e5e4a29ab5f49ffff001d1dac2b7c",
    )
    .unwrap();
    let genesis = header::decode(&raw).unwrap();
    let relay = SpvRelay::new(ChainParams::mainnet());
    relay.initialize(&genesis, 0, header::id(&genesis)).unwrap();

    assert_eq!(
        relay.submit_headers(&[0x13; 32], &raw),
        Err(RelayError::UnknownAnchor)
    );
    // the genesis header does not link to itself
    assert_eq!(
        relay.submit_headers(&header::id(&genesis), &raw),
        Err(RelayError::BrokenChainLink(1))
    );
}
