//! Round-trip and exact-byte tests for the varint codec.

use crate::varint::*;

// ------------------------------------------------------------------------------------------------
// Single values
// ------------------------------------------------------------------------------------------------

#[test]
fn single_byte_values() {
    for value in [0u64, 1, 42, 127] {
        let mut buf = [0u8; MAX_VARINT_LEN];
        assert_eq!(encode(value, &mut buf), 1);
        assert_eq!(buf[0], value as u8);
        assert_eq!(decode(&buf).unwrap(), (value, 1));
    }
}

#[test]
fn known_encodings() {
    let cases: &[(u64, &[u8])] = &[
        (128, &[0x80, 0x01]),
        (300, &[0xAC, 0x02]),
        (16_383, &[0xFF, 0x7F]),
        (16_384, &[0x80, 0x80, 0x01]),
    ];
    for &(value, expected) in cases {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let len = encode(value, &mut buf);
        assert_eq!(&buf[..len], expected, "encoding of {value}");
        assert_eq!(decode(expected).unwrap(), (value, expected.len()));
    }
}

#[test]
fn max_value_takes_ten_bytes() {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode(u64::MAX, &mut buf);
    assert_eq!(len, MAX_VARINT_LEN);
    assert_eq!(buf[9], 0x01);
    assert_eq!(decode(&buf).unwrap(), (u64::MAX, MAX_VARINT_LEN));
}

#[test]
fn encoded_len_matches_encode() {
    let mut value = 1u64;
    for _ in 0..64 {
        for v in [value - 1, value, value | (value >> 1)] {
            let mut buf = [0u8; MAX_VARINT_LEN];
            assert_eq!(encoded_len(v), encode(v, &mut buf), "value {v}");
        }
        value = value.wrapping_shl(1).max(1);
    }
    assert_eq!(encoded_len(u64::MAX), MAX_VARINT_LEN);
}

#[test]
fn decode_ignores_trailing_bytes() {
    let buf = [0xAC, 0x02, 0xFF, 0xFF];
    assert_eq!(decode(&buf).unwrap(), (300, 2));
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

#[test]
fn record_roundtrip() {
    let (buf, len) = encode_record(129, 40);
    assert_eq!(len, 3);
    assert_eq!(&buf[..len], &[0x81, 0x01, 40]);
    assert_eq!(decode_record(&buf[..len]).unwrap(), (129, 40, 3));
    assert_eq!(record_len(129, 40), 3);
}

#[test]
fn largest_record_fits_scratch() {
    let (buf, len) = encode_record(u64::MAX, u64::MAX);
    assert_eq!(len, MAX_RECORD_SIZE);
    assert_eq!(decode_record(&buf).unwrap(), (u64::MAX, u64::MAX, MAX_RECORD_SIZE));
}

#[test]
fn back_to_back_records() {
    let mut packed = Vec::new();
    let records = [(1u64, 10u64), (2, 20), (300, 70_000), (u64::MAX, 0)];
    for &(k, v) in &records {
        let (buf, len) = encode_record(k, v);
        packed.extend_from_slice(&buf[..len]);
    }

    let mut offset = 0;
    let mut decoded = Vec::new();
    while offset < packed.len() {
        let (k, v, len) = decode_record(&packed[offset..]).unwrap();
        decoded.push((k, v));
        offset += len;
    }
    assert_eq!(decoded, records);
}

// ------------------------------------------------------------------------------------------------
// Property
// ------------------------------------------------------------------------------------------------

mod properties {
    use crate::varint::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_roundtrip(value in any::<u64>()) {
            let mut buf = [0u8; MAX_VARINT_LEN];
            let len = encode(value, &mut buf);
            prop_assert!(len <= MAX_VARINT_LEN);
            prop_assert_eq!(len, encoded_len(value));
            prop_assert_eq!(decode(&buf[..len]).unwrap(), (value, len));
        }

        #[test]
        fn prop_record_roundtrip(key in any::<u64>(), value in any::<u64>()) {
            let (buf, len) = encode_record(key, value);
            prop_assert_eq!(len, record_len(key, value));
            prop_assert_eq!(decode_record(&buf[..len]).unwrap(), (key, value, len));
        }
    }
}
