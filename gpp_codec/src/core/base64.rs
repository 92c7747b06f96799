use crate::core::{BitString, DecodingError};
use bitstream_io::{BigEndian, BitWrite, BitWriter};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn base64_value(b: u8) -> Option<u8> {
    match b {
        b'A'..=b'Z' => Some(b - b'A'),
        b'a'..=b'z' => Some(b - b'a' + 26),
        b'0'..=b'9' => Some(b - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// Decodes a base64url string (no padding) into its bits, 6 per character.
pub(crate) fn decode_base64_url(s: &str) -> Result<BitString, DecodingError> {
    let mut w = BitWriter::endian(Vec::with_capacity(s.len() * 6 / 8 + 1), BigEndian);

    for (offset, byte) in s.bytes().enumerate() {
        let value =
            base64_value(byte).ok_or(DecodingError::InvalidBase64Byte { offset, byte })?;
        w.write_unsigned_var::<u8>(6, value)?;
    }
    w.byte_align()?;

    Ok(BitString {
        bytes: w.into_writer(),
        len: s.len() * 6,
    })
}

/// Encodes bits as base64url, right-padding the last character with zero bits.
pub(crate) fn encode_base64_url(bits: &BitString) -> String {
    let bits: Vec<bool> = bits.iter().collect();

    bits.chunks(6)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0usize, |acc, (i, &bit)| acc | (usize::from(bit) << (5 - i)))
        })
        .map(|value| char::from(ALPHABET[value]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(b'A' => Some(0))]
    #[test_case(b'Z' => Some(25))]
    #[test_case(b'a' => Some(26))]
    #[test_case(b'z' => Some(51))]
    #[test_case(b'0' => Some(52))]
    #[test_case(b'9' => Some(61))]
    #[test_case(b'-' => Some(62) ; "dash")]
    #[test_case(b'_' => Some(63) ; "underscore")]
    #[test_case(b'=' => None ; "equal")]
    #[test_case(b'#' => None ; "sharp")]
    #[test_case(b'+' => None ; "plus")]
    fn base64_value_map(b: u8) -> Option<u8> {
        base64_value(b)
    }

    #[test_case("DBABM" => "000011000001000000000001001100" ; "simple header")]
    #[test_case("_-" => "111111111110" ; "url safe characters")]
    #[test_case("" => "" ; "empty string")]
    fn decode(s: &str) -> String {
        decode_base64_url(s).unwrap().to_string()
    }

    #[test_case("===" => matches DecodingError::InvalidBase64Byte { offset: 0, byte: b'=' } ; "equal signs")]
    #[test_case("a  " => matches DecodingError::InvalidBase64Byte { offset: 1, byte: b' ' } ; "whitespaces")]
    #[test_case("ab+/" => matches DecodingError::InvalidBase64Byte { offset: 2, byte: b'+' } ; "standard alphabet")]
    fn decode_error(s: &str) -> DecodingError {
        decode_base64_url(s).unwrap_err()
    }

    #[test_case("000011000001000000000001001100" => "DBABM" ; "simple header")]
    #[test_case("1" => "g" ; "single bit is padded")]
    #[test_case("0000110000010000000000010011" => "DBABM" ; "partial group")]
    #[test_case("" => "" ; "empty")]
    fn encode(bits: &str) -> String {
        encode_base64_url(&bits.parse().unwrap())
    }
}
