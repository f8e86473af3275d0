use super::*;

fn record(x: i32, y: i32, id: i32, flags: CellFlags, coord: (i16, i16)) -> CellRecord {
    CellRecord { position: PosKey::new(x, y), tile_id: id, flags, autotile_coord: coord }
}

#[test]
fn test_encode_layout() {
    let flags = CellFlags { flip_h: true, flip_v: false, transpose: true };
    let data = encode(&[record(2, 3, 7, flags, (4, 5))]);
    assert_eq!(data.len(), 3);
    assert_eq!(data[0], 2 | (3 << 16));
    assert_eq!(data[1] as u32, 7 | (1 << 29) | (1 << 31));
    assert_eq!(data[2], 4 | (5 << 16));
}

#[test]
fn test_negative_coordinates_survive() {
    let original = record(-3, -40, 12, CellFlags::default(), (0, 1));
    let decoded = decode(&encode(&[original]), TileDataFormat::Format2).unwrap();
    assert_eq!(decoded, vec![original]);
}

#[test]
fn test_negative_autotile_coord_survives() {
    let original = record(5, 6, 1, CellFlags::default(), (-1, 2));
    let data = encode(&[original]);
    assert_eq!(data[2] as u32, 0xFFFF | (2 << 16));
    assert_eq!(decode(&data, TileDataFormat::Format2).unwrap(), vec![original]);
}

#[test]
fn test_format1_has_no_autotile_coord() {
    let data = [pack_pair(1, 2), (9 | (1 << 30)) as i32];
    let decoded = decode(&data, TileDataFormat::Format1).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].position, PosKey::new(1, 2));
    assert_eq!(decoded[0].tile_id, 9);
    assert!(decoded[0].flags.flip_v);
    assert_eq!(decoded[0].autotile_coord, (0, 0));
}

#[test]
fn test_corrupted_length_is_rejected() {
    let err = decode(&[1, 2, 3, 4], TileDataFormat::Format2).unwrap_err();
    assert_eq!(err, Error::InvalidArgument("Corrupted tile data.".to_string()));
}

#[test]
fn test_byte_view_round_trip() {
    let data = encode(&[record(1, 1, 1, CellFlags::default(), (2, 2))]);
    let bytes = as_bytes(&data);
    assert_eq!(bytes.len(), 12);
    assert_eq!(from_bytes(bytes).unwrap(), data);
    assert!(from_bytes(&bytes[..5]).is_err());
}
