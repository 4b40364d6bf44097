//! Per-direction keystream machinery backing `CipherPair`.
//!
//! CFB and CFB8 are built directly on RustCrypto block-cipher primitives
//! (the way the reference Shadowsocks stack builds them over OpenSSL's
//! EVP block-cipher interface) because no published crate reproduces
//! OpenSSL's CFB/CFB8 byte-for-byte across AES-128/192/256 and Blowfish.
//! CTR and RC4 delegate to their dedicated stream-cipher crates, which
//! already match the reference bit-for-bit.

use super::CipherKind;
use aes::{Aes128, Aes192, Aes256};
use blowfish::Blowfish;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, BlockSizeUser, KeyInit, KeyIvInit, StreamCipher};
use md5::{Digest, Md5};
use rc4::Rc4;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encrypt,
    Decrypt,
}

/// A single direction's running cipher state. Implementors mutate `buf`
/// in place; repeated calls continue the stream from where the last call
/// left off (strict arrival order, per SPEC_FULL §5).
pub(crate) trait Keystream: Send {
    fn apply(&mut self, buf: &mut [u8]);
}

trait BoxBlockCipher: Send {
    fn block_size(&self) -> usize;
    fn encrypt_block(&self, input: &[u8]) -> Vec<u8>;
}

struct BlockWrap<C>(C);

impl<C: BlockEncrypt + BlockSizeUser + Send> BoxBlockCipher for BlockWrap<C> {
    fn block_size(&self) -> usize {
        C::block_size()
    }

    fn encrypt_block(&self, input: &[u8]) -> Vec<u8> {
        let mut block = GenericArray::clone_from_slice(input);
        self.0.encrypt_block(&mut block);
        block.to_vec()
    }
}

fn make_block_cipher(kind: CipherKind, key: &[u8]) -> Box<dyn BoxBlockCipher> {
    match kind {
        CipherKind::Aes128Cfb | CipherKind::Aes128Cfb8 => {
            Box::new(BlockWrap(Aes128::new_from_slice(key).expect("key length checked by caller")))
        }
        CipherKind::Aes192Cfb | CipherKind::Aes192Cfb8 => {
            Box::new(BlockWrap(Aes192::new_from_slice(key).expect("key length checked by caller")))
        }
        CipherKind::Aes256Cfb | CipherKind::Aes256Cfb8 => {
            Box::new(BlockWrap(Aes256::new_from_slice(key).expect("key length checked by caller")))
        }
        CipherKind::BfCfb => {
            Box::new(BlockWrap(Blowfish::new_from_slice(key).expect("key length checked by caller")))
        }
        other => unreachable!("make_block_cipher called for non-block-mode kind {other:?}"),
    }
}

/// Full-segment CFB (OpenSSL's plain "cfb" == CFB-128 for a 16-byte
/// block, CFB-64 for Blowfish's 8-byte block): the whole block of
/// keystream is consumed before the feedback register advances.
struct CfbFull {
    cipher: Box<dyn BoxBlockCipher>,
    register: Vec<u8>,
    keystream: Vec<u8>,
    feedback: Vec<u8>,
    pos: usize,
    direction: Direction,
}

impl CfbFull {
    fn new(cipher: Box<dyn BoxBlockCipher>, iv: &[u8], direction: Direction) -> Self {
        CfbFull {
            cipher,
            register: iv.to_vec(),
            keystream: Vec::new(),
            feedback: Vec::new(),
            pos: 0,
            direction,
        }
    }
}

impl Keystream for CfbFull {
    fn apply(&mut self, buf: &mut [u8]) {
        let block_size = self.cipher.block_size();
        for b in buf.iter_mut() {
            if self.pos == 0 {
                self.keystream = self.cipher.encrypt_block(&self.register);
                self.feedback.clear();
            }
            let in_byte = *b;
            let out_byte = in_byte ^ self.keystream[self.pos];
            let feedback_byte = match self.direction {
                Direction::Encrypt => out_byte,
                Direction::Decrypt => in_byte,
            };
            self.feedback.push(feedback_byte);
            *b = out_byte;
            self.pos += 1;
            if self.pos == block_size {
                self.register = std::mem::take(&mut self.feedback);
                self.pos = 0;
            }
        }
    }
}

/// 1-byte segment CFB ("cfb8"): the register shifts by a single byte and
/// the block cipher re-runs on every plaintext/ciphertext byte.
struct Cfb8 {
    cipher: Box<dyn BoxBlockCipher>,
    register: Vec<u8>,
    direction: Direction,
}

impl Cfb8 {
    fn new(cipher: Box<dyn BoxBlockCipher>, iv: &[u8], direction: Direction) -> Self {
        Cfb8 {
            cipher,
            register: iv.to_vec(),
            direction,
        }
    }
}

impl Keystream for Cfb8 {
    fn apply(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            let keystream = self.cipher.encrypt_block(&self.register);
            let in_byte = *b;
            let out_byte = in_byte ^ keystream[0];
            let feedback_byte = match self.direction {
                Direction::Encrypt => out_byte,
                Direction::Decrypt => in_byte,
            };
            self.register.remove(0);
            self.register.push(feedback_byte);
            *b = out_byte;
        }
    }
}

/// Wraps any RustCrypto `StreamCipher` (CTR, RC4) — these are direction-
/// agnostic, since their keystream never depends on plaintext/ciphertext.
struct GenericStream(Box<dyn StreamCipher + Send>);

impl Keystream for GenericStream {
    fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

pub(crate) struct MakeKeystream;

impl MakeKeystream {
    pub(crate) fn build(
        kind: CipherKind,
        key: &[u8],
        iv: &[u8],
        direction: Direction,
    ) -> Box<dyn Keystream> {
        use CipherKind::*;
        match kind {
            Aes128Cfb | Aes192Cfb | Aes256Cfb | BfCfb => {
                Box::new(CfbFull::new(make_block_cipher(kind, key), iv, direction))
            }
            Aes128Cfb8 | Aes192Cfb8 | Aes256Cfb8 => {
                Box::new(Cfb8::new(make_block_cipher(kind, key), iv, direction))
            }
            Aes128Ctr => Box::new(GenericStream(Box::new(ctr::Ctr128BE::<Aes128>::new(
                key.into(),
                iv.into(),
            )))),
            Aes192Ctr => Box::new(GenericStream(Box::new(ctr::Ctr128BE::<Aes192>::new(
                key.into(),
                iv.into(),
            )))),
            Aes256Ctr => Box::new(GenericStream(Box::new(ctr::Ctr128BE::<Aes256>::new(
                key.into(),
                iv.into(),
            )))),
            Rc4Md5 => {
                // Effective key = MD5(key || iv); underlying cipher is
                // plain RC4 with no separate IV (SPEC_FULL §4.A).
                let mut hasher = Md5::new();
                hasher.update(key);
                hasher.update(iv);
                let effective_key = hasher.finalize();
                Box::new(GenericStream(Box::new(Rc4::new(&effective_key))))
            }
        }
    }
}
