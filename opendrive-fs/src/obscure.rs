//! Reversible obscuring for passwords kept in configuration.
//!
//! This is not encryption in any meaningful sense: the key is fixed and
//! public. It only keeps passwords from being readable at a glance, and uses
//! the same layout as rclone (AES-256-CTR, random IV prefix, unpadded
//! URL-safe base64) so existing obscured values can be reused.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use thiserror::Error;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const CRYPT_KEY: [u8; 32] = [
    0x9c, 0x93, 0x5b, 0x48, 0x73, 0x0a, 0x55, 0x4d, 0x6b, 0xfd, 0x7c, 0x63, 0xc8, 0x86, 0xa9, 0x2b,
    0xd3, 0x90, 0x19, 0x8e, 0xb8, 0x12, 0x8a, 0xfb, 0xf4, 0xde, 0x16, 0x2b, 0x8b, 0x95, 0xf6, 0x38,
];
const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum RevealError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("input too short")]
    TooShort,
    #[error("revealed value is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn obscure(plain: &str) -> String {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let mut buf = plain.as_bytes().to_vec();
    apply_keystream(&iv, &mut buf);

    let mut out = Vec::with_capacity(IV_LEN + buf.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buf);
    URL_SAFE_NO_PAD.encode(out)
}

pub fn reveal(obscured: &str) -> Result<String, RevealError> {
    let raw = URL_SAFE_NO_PAD.decode(obscured.trim())?;
    if raw.len() < IV_LEN {
        return Err(RevealError::TooShort);
    }
    let (iv, cipher_text) = raw.split_at(IV_LEN);
    let mut buf = cipher_text.to_vec();
    apply_keystream(iv, &mut buf);
    Ok(String::from_utf8(buf)?)
}

fn apply_keystream(iv: &[u8], buf: &mut [u8]) {
    let mut cipher = Aes256Ctr::new(
        GenericArray::from_slice(&CRYPT_KEY),
        GenericArray::from_slice(iv),
    );
    cipher.apply_keystream(buf);
}
