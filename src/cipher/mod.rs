//! Stream-cipher construction for the Shadowsocks remote end (SPEC_FULL
//! §4.A). Builds CFB/CFB8 feedback modes directly on top of RustCrypto
//! block-cipher primitives the way the reference Shadowsocks stack builds
//! them over OpenSSL's EVP interface, plus CTR and RC4-MD5 via their
//! dedicated stream-cipher crates.

mod stream;

use crate::{Error, Result};
use md5::{Digest, Md5};
use rand::RngCore;
use stream::{Direction, Keystream, MakeKeystream};

/// The eleven stream-cipher methods a client may request (SPEC_FULL §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Cfb8,
    Aes192Cfb8,
    Aes256Cfb8,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    BfCfb,
    Rc4Md5,
}

impl CipherKind {
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::Aes128Cfb | CipherKind::Aes128Cfb8 | CipherKind::Aes128Ctr => 16,
            CipherKind::Aes192Cfb | CipherKind::Aes192Cfb8 | CipherKind::Aes192Ctr => 24,
            CipherKind::Aes256Cfb | CipherKind::Aes256Cfb8 | CipherKind::Aes256Ctr => 32,
            CipherKind::BfCfb => 16,
            CipherKind::Rc4Md5 => 16,
        }
    }

    pub fn iv_len(&self) -> usize {
        match self {
            CipherKind::BfCfb => 8,
            _ => 16,
        }
    }
}

impl TryFrom<&str> for CipherKind {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "aes-128-cfb" => Ok(CipherKind::Aes128Cfb),
            "aes-192-cfb" => Ok(CipherKind::Aes192Cfb),
            "aes-256-cfb" => Ok(CipherKind::Aes256Cfb),
            "aes-128-cfb8" => Ok(CipherKind::Aes128Cfb8),
            "aes-192-cfb8" => Ok(CipherKind::Aes192Cfb8),
            "aes-256-cfb8" => Ok(CipherKind::Aes256Cfb8),
            "aes-128-ctr" => Ok(CipherKind::Aes128Ctr),
            "aes-192-ctr" => Ok(CipherKind::Aes192Ctr),
            "aes-256-ctr" => Ok(CipherKind::Aes256Ctr),
            "bf-cfb" => Ok(CipherKind::BfCfb),
            "rc4-md5" => Ok(CipherKind::Rc4Md5),
            other => Err(Error::config(format!("unsupported cipher method: {other}"))),
        }
    }
}

/// EVP_BytesToKey-style key derivation: iteratively MD5(prev ∥ password)
/// until `key_len` bytes are available. Bit-exact with the reference
/// Shadowsocks/OpenSSL derivation; MUST NOT be "improved".
pub fn derive_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        let digest = hasher.finalize();
        prev = digest.to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    key
}

/// One direction's cipher state. Constructed empty; initializes itself on
/// the first `apply` call per SPEC_FULL §3/§4.A's once-only IV prefix
/// rules. Decrypt and encrypt directions are always two independent
/// `Direction` instances even though both ultimately wrap the same
/// `CipherKind` — sharing one mutable keystream between directions is
/// exactly the aliasing bug SPEC_FULL §9 calls out.
enum DirectionState {
    /// Waiting to consume (decrypt) or emit (encrypt) its IV.
    Pending,
    Active(Box<dyn Keystream>),
}

pub struct Decryptor {
    kind: CipherKind,
    key: Vec<u8>,
    state: DirectionState,
    /// Buffers partial IV bytes across `decrypt` calls that don't yet
    /// deliver a whole IV.
    iv_buf: Vec<u8>,
}

pub struct Encryptor {
    kind: CipherKind,
    key: Vec<u8>,
    state: DirectionState,
    iv: Vec<u8>,
    iv_emitted: bool,
}

impl Decryptor {
    fn new(kind: CipherKind, key: Vec<u8>) -> Self {
        Decryptor {
            kind,
            key,
            state: DirectionState::Pending,
            iv_buf: Vec::new(),
        }
    }

    /// Decrypts `input` in place order, consuming the peer's IV from the
    /// front of the very first call(s) if not yet seen. Returns the
    /// decrypted payload bytes (excludes any IV bytes consumed).
    pub fn decrypt(&mut self, input: &[u8]) -> Vec<u8> {
        let mut input = input;
        if matches!(self.state, DirectionState::Pending) {
            let needed = self.kind.iv_len() - self.iv_buf.len();
            let take = needed.min(input.len());
            self.iv_buf.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.iv_buf.len() < self.kind.iv_len() {
                return Vec::new();
            }
            let keystream = MakeKeystream::build(self.kind, &self.key, &self.iv_buf, Direction::Decrypt);
            self.state = DirectionState::Active(keystream);
        }
        let DirectionState::Active(ref mut ks) = self.state else {
            unreachable!()
        };
        let mut out = input.to_vec();
        ks.apply(&mut out);
        out
    }
}

impl Encryptor {
    fn new(kind: CipherKind, key: Vec<u8>) -> Self {
        let mut iv = vec![0u8; kind.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);
        Encryptor {
            kind,
            key,
            state: DirectionState::Pending,
            iv,
            iv_emitted: false,
        }
    }

    /// Encrypts `input`, prefixing the freshly generated IV to the output
    /// exactly once, on the first call.
    pub fn encrypt(&mut self, input: &[u8]) -> Vec<u8> {
        if matches!(self.state, DirectionState::Pending) {
            let keystream = MakeKeystream::build(self.kind, &self.key, &self.iv, Direction::Encrypt);
            self.state = DirectionState::Active(keystream);
        }
        let DirectionState::Active(ref mut ks) = self.state else {
            unreachable!()
        };
        let mut out = input.to_vec();
        ks.apply(&mut out);
        if !self.iv_emitted {
            self.iv_emitted = true;
            let mut prefixed = self.iv.clone();
            prefixed.extend_from_slice(&out);
            return prefixed;
        }
        out
    }

    /// The IV this encryptor will (or did) emit as its first output
    /// bytes — exposed for tests asserting SPEC_FULL §8's IV-prefix
    /// invariant.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

/// Owns one connection's two independent directional cipher states.
pub struct CipherPair {
    pub decryptor: Decryptor,
    pub encryptor: Encryptor,
}

impl CipherPair {
    pub fn new(kind: CipherKind, password: &[u8]) -> Self {
        let key = derive_key(password, kind.key_len());
        CipherPair {
            decryptor: Decryptor::new(kind, key.clone()),
            encryptor: Encryptor::new(kind, key),
        }
    }
}
