//! Perceptual watermark codeword
//!
//! Layout of the 64-bit word repeated in every segment:
//!
//! | bits   | field                       |
//! |--------|-----------------------------|
//! | 0..8   | sync word `0xB5`            |
//! | 8..10  | payload length - 1          |
//! | 10..42 | payload, zero padded        |
//! | 42..58 | CRC-16/CCITT of len + data  |
//! | 58..64 | zero                        |
//!
//! All fields are written most significant bit first.

use crate::error::{Result, WmError};

pub const WORD_BITS: usize = 64;
pub const SYNC_WORD: u8 = 0xB5;
pub const MAX_PAYLOAD_BYTES: usize = 4;

/// Payload embedded when the caller supplies none
pub const DEFAULT_PAYLOAD: &[u8] = b"WMB1";

const SYNC_START: usize = 0;
const LEN_START: usize = 8;
const DATA_START: usize = 10;
const CRC_START: usize = 42;
const PAD_START: usize = 58;

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF)
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Check that a payload fits the word
///
/// # Errors
/// * `InvalidParameter` - If the payload is empty or longer than 4 bytes
pub fn validate_payload(payload: &[u8]) -> Result<()> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD_BYTES {
        return Err(WmError::invalid(
            "payload",
            format!(
                "must be 1 to {} bytes, got {}",
                MAX_PAYLOAD_BYTES,
                payload.len()
            ),
        ));
    }
    Ok(())
}

fn write_bits(word: &mut [bool], start: usize, value: u32, width: usize) {
    for i in 0..width {
        word[start + i] = (value >> (width - 1 - i)) & 1 == 1;
    }
}

fn read_bits(word: &[bool], start: usize, width: usize) -> u32 {
    word[start..start + width]
        .iter()
        .fold(0u32, |acc, &bit| (acc << 1) | bit as u32)
}

fn crc_input(len: usize, data: &[u8; MAX_PAYLOAD_BYTES]) -> [u8; 5] {
    [len as u8, data[0], data[1], data[2], data[3]]
}

/// Build the word carrying `payload`
pub fn encode_word(payload: &[u8]) -> Result<[bool; WORD_BITS]> {
    validate_payload(payload)?;

    let mut data = [0u8; MAX_PAYLOAD_BYTES];
    data[..payload.len()].copy_from_slice(payload);
    let crc = crc16_ccitt(&crc_input(payload.len(), &data));

    let mut word = [false; WORD_BITS];
    write_bits(&mut word, SYNC_START, SYNC_WORD as u32, 8);
    write_bits(&mut word, LEN_START, (payload.len() - 1) as u32, 2);
    write_bits(&mut word, DATA_START, u32::from_be_bytes(data), 32);
    write_bits(&mut word, CRC_START, crc as u32, 16);
    Ok(word)
}

/// Recover the payload from a hard-decided word
///
/// Returns `None` unless sync, padding and CRC all check out.
pub fn decode_word(word: &[bool]) -> Option<Vec<u8>> {
    if word.len() != WORD_BITS {
        return None;
    }
    if read_bits(word, SYNC_START, 8) != SYNC_WORD as u32 {
        return None;
    }
    if word[PAD_START..].iter().any(|&bit| bit) {
        return None;
    }

    let len = read_bits(word, LEN_START, 2) as usize + 1;
    let data = read_bits(word, DATA_START, 32).to_be_bytes();
    let crc = read_bits(word, CRC_START, 16) as u16;
    if crc16_ccitt(&crc_input(len, &data)) != crc {
        return None;
    }
    // Bytes past the declared length must be padding
    if data[len..].iter().any(|&b| b != 0) {
        return None;
    }
    Some(data[..len].to_vec())
}

/// Positions and values of the bits every valid word shares
pub fn pilot_bits() -> impl Iterator<Item = (usize, bool)> {
    (0..8)
        .map(|i| (SYNC_START + i, (SYNC_WORD >> (7 - i)) & 1 == 1))
        .chain((PAD_START..WORD_BITS).map(|i| (i, false)))
}
