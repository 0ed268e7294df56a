// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::enc::write::Writer;

/// Hard upper bound for a single encoded entity. Anything larger than a full
/// block is a codec error, never a larger buffer.
pub const CODEC_BYTES_LIMIT: usize = 1_000_000;

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

pub fn encode<W: Writer, T: bincode::Encode>(
    writer: W,
    val: &T,
) -> Result<(), bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_into_writer(val, writer, config)
}

pub fn decode<T: bincode::Decode>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::decode_from_slice(bytes, config).map(|r| r.0)
}

#[inline]
pub fn decode_fixed_u32<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u32, bincode::error::DecodeError> {
    let v: [u8; 4] = bincode::Decode::decode(decoder)?;
    Ok(u32::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_u32<E: bincode::enc::Encoder>(
    v: u32,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[inline]
pub fn decode_fixed_u64<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u64, bincode::error::DecodeError> {
    let v: [u8; 8] = bincode::Decode::decode(decoder)?;
    Ok(u64::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_u64<E: bincode::enc::Encoder>(
    v: u64,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}
