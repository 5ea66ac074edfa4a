//! Word rendering of arbitrary-length binary blobs for backup sheets.
//!
//! Data is front-padded with `0x81` to a multiple of four bytes, then split
//! into 11-bit groups over the BIP39 English list, with `len * 8 / 32`
//! checksum bits taken from SHA-256 of the padded data. The first data byte
//! must not exceed `0x80` so the padding can be stripped unambiguously.

use bip39::Language;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

const CHUNK_SIZE: usize = 4;
const PADDING_BYTE: u8 = 0x81;
const BITS_PER_WORD: usize = 11;
/// Checksum bits cannot exceed one SHA-256 digest.
const MAX_DATA_LEN: usize = 256 * 32 / 8;

pub fn encode(data: &[u8]) -> WalletResult<String> {
    let first = *data.first().ok_or_else(|| {
        WalletError::ValidationError("Cannot encode empty data".to_string())
    })?;
    if first > 0x80 {
        return Err(WalletError::ValidationError(
            "First byte must not exceed 0x80".to_string(),
        ));
    }

    let padding = (CHUNK_SIZE - data.len() % CHUNK_SIZE) % CHUNK_SIZE;
    let mut padded = Zeroizing::new(vec![PADDING_BYTE; padding]);
    padded.extend_from_slice(data);
    if padded.len() > MAX_DATA_LEN {
        return Err(WalletError::ValidationError(format!(
            "Cannot encode more than {} bytes",
            MAX_DATA_LEN
        )));
    }

    let checksum = Sha256::digest(&padded[..]);
    let checksum_bits = padded.len() * 8 / 32;

    let mut bits = Vec::with_capacity(padded.len() * 8 + checksum_bits);
    push_bits(&mut bits, &padded, padded.len() * 8);
    push_bits(&mut bits, &checksum, checksum_bits);

    let list = Language::English.word_list();
    let words: Vec<&str> = bits
        .chunks(BITS_PER_WORD)
        .map(|chunk| list[chunk.iter().fold(0usize, |acc, bit| (acc << 1) | *bit as usize)])
        .collect();
    Ok(words.join(" "))
}

pub fn decode(words: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
    let list = Language::English.word_list();
    let mut bits = Vec::new();
    for word in words.split_whitespace() {
        let word = word.to_lowercase();
        let index = list
            .iter()
            .position(|candidate| *candidate == word)
            .ok_or_else(|| WalletError::ValidationError(format!("Unknown word: {}", word)))?;
        for shift in (0..BITS_PER_WORD).rev() {
            bits.push((index >> shift) & 1 == 1);
        }
    }

    // total = 33 * data_bits / 32
    let data_bits = bits.len() * 32 / 33;
    if bits.is_empty()
        || data_bits % (CHUNK_SIZE * 8) != 0
        || data_bits + data_bits / 32 != bits.len()
    {
        return Err(WalletError::ValidationError(
            "Invalid number of words".to_string(),
        ));
    }
    if data_bits / 8 > MAX_DATA_LEN {
        return Err(WalletError::ValidationError(format!(
            "Cannot decode more than {} bytes",
            MAX_DATA_LEN
        )));
    }

    let mut data = Zeroizing::new(
        bits[..data_bits]
            .chunks(8)
            .map(|byte| byte.iter().fold(0u8, |acc, bit| (acc << 1) | *bit as u8))
            .collect::<Vec<u8>>(),
    );

    let checksum = Sha256::digest(&data[..]);
    let mut expected = Vec::with_capacity(data_bits / 32);
    push_bits(&mut expected, &checksum, data_bits / 32);
    if expected[..] != bits[data_bits..] {
        return Err(WalletError::ValidationError(
            "Invalid word checksum".to_string(),
        ));
    }

    let padding = data.iter().take_while(|b| **b == PADDING_BYTE).count();
    data.drain(..padding);
    Ok(data)
}

fn push_bits(bits: &mut Vec<bool>, bytes: &[u8], count: usize) {
    for i in 0..count {
        bits.push((bytes[i / 8] >> (7 - i % 8)) & 1 == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_data_matches_bip39() {
        let entropy = [0u8; 16];
        let words = encode(&entropy).unwrap();
        let expected = bip39::Mnemonic::from_entropy(&entropy).unwrap().to_string();
        assert_eq!(words, expected);
    }

    #[test]
    fn unaligned_data_is_padded_and_stripped() {
        let data: Vec<u8> = (0..79u8).collect();
        let words = encode(&data).unwrap();
        assert_eq!(words.split(' ').count(), 80 / 4 * 3);
        assert_eq!(&decode(&words).unwrap()[..], &data[..]);
    }

    #[test]
    fn high_first_byte_is_refused() {
        assert!(encode(&[0x81, 1, 2, 3]).is_err());
        assert!(encode(&[]).is_err());
    }

    #[test]
    fn corrupted_words_are_detected() {
        let words = encode(&[0x10; 32]).unwrap();
        let wordlist = Language::English.word_list();
        let mut list: Vec<&str> = words.split(' ').collect();
        let last = list.len() - 1;
        let index = wordlist.iter().position(|w| *w == list[last]).unwrap();
        // lowest bit of the last word is a checksum bit
        list[last] = wordlist[index ^ 1];
        assert!(decode(&list.join(" ")).is_err());
        assert!(decode("notaword").is_err());
    }

    #[test]
    fn oversized_word_lists_are_refused() {
        // 771 words: 1028 data bytes, one checksum bit more than a digest holds
        let words = vec!["abandon"; 771].join(" ");
        assert!(matches!(
            decode(&words),
            Err(WalletError::ValidationError(msg)) if msg.contains("more than")
        ));

        let largest = encode(&vec![0x10; MAX_DATA_LEN]).unwrap();
        assert_eq!(decode(&largest).unwrap().len(), MAX_DATA_LEN);
    }
}
