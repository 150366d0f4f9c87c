//! The PDF standard security handler: password authentication, key
//! derivation and per-object decryption (revisions 2-4 and 6).

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use bitflags::bitflags;
use log::warn;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use crate::error::*;
use crate::object::{Object, PlainRef, Resolve};
use crate::primitive::{Dictionary, Name, Primitive};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// The 32-byte padding string of Algorithm 2.
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41,
    0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80,
    0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

#[derive(Copy)]
pub struct Rc4 {
    i: u8,
    j: u8,
    state: [u8; 256],
}

impl Clone for Rc4 {
    fn clone(&self) -> Rc4 {
        *self
    }
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Rc4 {
        assert!(!key.is_empty() && key.len() <= 256);
        let mut rc4 = Rc4 { i: 0, j: 0, state: [0; 256] };
        for (i, x) in rc4.state.iter_mut().enumerate() {
            *x = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(rc4.state[i]).wrapping_add(key[i % key.len()]);
            rc4.state.swap(i, j as usize);
        }
        rc4
    }
    fn next(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);
        self.state[(self.state[self.i as usize].wrapping_add(self.state[self.j as usize])) as usize]
    }
    /// RC4 is symmetric: this both encrypts and decrypts.
    pub fn encrypt(key: &[u8], data: &mut [u8]) {
        let mut rc4 = Rc4::new(key);
        for b in data.iter_mut() {
            *b ^= rc4.next();
        }
    }
}

bitflags! {
    /// The user access permissions of the `/P` entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const COPY = 1 << 4;
        const ANNOTATE = 1 << 5;
        const FILL_FORMS = 1 << 8;
        const EXTRACT = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HQ = 1 << 11;
    }
}

/// How a crypt filter transforms data (`/CFM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    Identity,
    V2,
    AESV2,
    AESV3,
}

impl CryptMethod {
    fn from_name(name: &str) -> Result<CryptMethod> {
        Ok(match name {
            "Identity" => CryptMethod::Identity,
            "V2" => CryptMethod::V2,
            "AESV2" => CryptMethod::AESV2,
            "AESV3" => CryptMethod::AESV3,
            other => err!(PdfError::UnsupportedEncryption {
                msg: format!("crypt filter method {}", other),
            }),
        })
    }
}

/// One entry of the `/CF` dictionary.
#[derive(Debug, Clone)]
pub struct CryptFilter {
    pub method: CryptMethod,
    /// Key length in bytes, overriding the document `/Length`.
    pub length: Option<u32>,
}

impl Object for CryptFilter {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        let mut dict = p.resolve(r)?.into_dictionary()?;
        dict.expect("CryptFilter", "Type", "CryptFilter", false)?;
        let method = match dict.remove("CFM") {
            Some(p) => CryptMethod::from_name(&p.resolve(r)?.into_name()?)?,
            None => err!(PdfError::UnsupportedEncryption {
                msg: "crypt filter without CFM".into(),
            }),
        };
        let length = match dict.remove("Length") {
            Some(p) => Some(p.resolve(r)?.as_u32()?),
            None => None,
        };
        Ok(CryptFilter { method, length })
    }
}

/// The `/Encrypt` dictionary of the standard security handler.
#[derive(Debug, Clone)]
pub struct CryptDict {
    pub v: i32,
    pub r: u32,
    /// Key length in bits.
    pub bits: u32,
    pub o: Vec<u8>,
    pub u: Vec<u8>,
    pub oe: Option<Vec<u8>>,
    pub ue: Option<Vec<u8>>,
    pub p: i32,
    pub encrypt_metadata: bool,
    pub crypt_filters: HashMap<Name, CryptFilter>,
    pub stream_filter: Name,
    pub string_filter: Name,
}

impl CryptDict {
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.p as u32)
    }

    fn key_bytes(&self) -> Result<usize> {
        if self.bits % 8 != 0 {
            bail!("key length {} is not a multiple of 8", self.bits);
        }
        Ok(self.bits as usize / 8)
    }
}

impl Object for CryptDict {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        let mut dict = p.resolve(r)?.into_dictionary()?;
        match dict.remove("Filter") {
            Some(name) => {
                let name = name.resolve(r)?.into_name()?;
                if name != "Standard" {
                    err!(PdfError::UnsupportedEncryption {
                        msg: format!("security handler {}", name),
                    });
                }
            }
            None => err!(PdfError::MissingEntry { typ: "Encrypt", field: "Filter".into() }),
        }

        let string_entry = |dict: &mut Dictionary, key: &str| -> Result<Option<Vec<u8>>> {
            match dict.remove(key) {
                Some(p) => Ok(Some(p.resolve(r)?.into_string()?.into_bytes())),
                None => Ok(None),
            }
        };

        let v = t!(dict.require("Encrypt", "V")).resolve(r)?.as_integer()?;
        let rev = t!(dict.require("Encrypt", "R")).resolve(r)?.as_u32()?;
        let bits = match dict.remove("Length") {
            Some(p) => p.resolve(r)?.as_u32()?,
            None => 40,
        };
        let mut crypt_dict = CryptDict {
            v,
            r: rev,
            bits,
            o: t!(string_entry(&mut dict, "O")).ok_or(PdfError::MissingEntry {
                typ: "Encrypt",
                field: "O".into(),
            })?,
            u: t!(string_entry(&mut dict, "U")).ok_or(PdfError::MissingEntry {
                typ: "Encrypt",
                field: "U".into(),
            })?,
            oe: t!(string_entry(&mut dict, "OE")),
            ue: t!(string_entry(&mut dict, "UE")),
            p: t!(dict.require("Encrypt", "P")).resolve(r)?.as_integer()?,
            encrypt_metadata: match dict.remove("EncryptMetadata") {
                Some(p) => p.resolve(r)?.as_bool()?,
                None => true,
            },
            crypt_filters: HashMap::new(),
            stream_filter: "Identity".into(),
            string_filter: "Identity".into(),
        };
        if let Some(cf) = dict.remove("CF") {
            for (name, filter) in cf.resolve(r)?.into_dictionary()? {
                crypt_dict
                    .crypt_filters
                    .insert(name, CryptFilter::from_primitive(filter, r)?);
            }
        }
        if let Some(p) = dict.remove("StmF") {
            crypt_dict.stream_filter = p.resolve(r)?.into_name()?;
        }
        if let Some(p) = dict.remove("StrF") {
            crypt_dict.string_filter = p.resolve(r)?.into_name()?;
        }
        Ok(crypt_dict)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revision {
    R2,
    R3,
    R4,
    R6,
}

/// Holds the file encryption key and decrypts strings and stream bodies.
/// Built once per document after the xref chain is read.
pub struct Decoder {
    key: Vec<u8>,
    revision: Revision,
    string_method: CryptMethod,
    stream_method: CryptMethod,
    crypt_filters: HashMap<Name, CryptFilter>,
    /// The `/Encrypt` dictionary itself is exempt: strings in it (`O`, `U`)
    /// are stored unencrypted.
    pub(crate) encrypt_indirect_object: Option<PlainRef>,
}

impl Decoder {
    pub fn default(dict: &CryptDict, id: &[u8]) -> Result<Decoder> {
        Decoder::from_password(dict, id, b"")
    }

    /// Authenticate `pass` as the user password, then as the owner
    /// password, and derive the file key. `id` is the first element of the
    /// trailer `/ID` array.
    pub fn from_password(dict: &CryptDict, id: &[u8], pass: &[u8]) -> Result<Decoder> {
        let revision = match (dict.v, dict.r) {
            (1 | 2 | 4, 2) => Revision::R2,
            (1 | 2 | 4, 3) => Revision::R3,
            (4, 4) => Revision::R4,
            (5, 6) => Revision::R6,
            (v, r) => err!(PdfError::UnsupportedEncryption {
                msg: format!("V {} with revision {}", v, r),
            }),
        };

        let (string_method, stream_method) = match dict.v {
            1 | 2 => (CryptMethod::V2, CryptMethod::V2),
            4 | 5 => (
                named_filter_method(dict, &dict.string_filter)?,
                named_filter_method(dict, &dict.stream_filter)?,
            ),
            v => err!(PdfError::UnsupportedEncryption { msg: format!("V value {}", v) }),
        };

        if !dict.encrypt_metadata {
            warn!("document metadata is unencrypted");
        }

        let key = if dict.v == 5 {
            // R6 passwords are unicode; callers pass UTF-8 bytes.
            let pass = std::str::from_utf8(pass)?;
            derive_key_r6(dict, pass)?
        } else {
            // A crypt filter may carry its own key length (in bytes),
            // overriding the document /Length.
            let mut dict = dict.clone();
            if dict.v == 4 {
                if let Some(length) = dict
                    .crypt_filters
                    .get(&dict.stream_filter)
                    .and_then(|filter| filter.length)
                {
                    dict.bits = length * 8;
                }
            }
            match authenticate_user_password(&dict, id, pass)? {
                Some(key) => key,
                None => match t!(authenticate_owner_password(&dict, id, pass)) {
                    Some(key) => key,
                    None => err!(PdfError::InvalidPassword),
                },
            }
        };

        Ok(Decoder {
            key,
            revision,
            string_method,
            stream_method,
            crypt_filters: dict.crypt_filters.clone(),
            encrypt_indirect_object: None,
        })
    }

    pub fn revision_supports_aes(&self) -> bool {
        matches!(self.revision, Revision::R4 | Revision::R6)
    }

    /// Decrypt a string that was parsed inside object `id`.
    pub fn decrypt_string(&self, id: PlainRef, data: Vec<u8>) -> Result<Vec<u8>> {
        if self.encrypt_indirect_object == Some(id) {
            return Ok(data);
        }
        self.decrypt_with(self.string_method, id, data)
    }

    /// Decrypt the raw body of the stream object `id`. Xref streams and
    /// streams naming their own `/Crypt` filter get special treatment.
    pub fn decrypt_stream(&self, id: PlainRef, info: &Dictionary, data: Vec<u8>) -> Result<Vec<u8>> {
        if let Some(Ok("XRef")) = info.get("Type").map(|p| p.as_name()) {
            return Ok(data);
        }
        let method = match stream_crypt_filter_name(info)? {
            Some(name) => match name.as_str() {
                "Identity" => CryptMethod::Identity,
                name => self
                    .crypt_filters
                    .get(name)
                    .ok_or_else(|| PdfError::NotFound { word: format!("crypt filter {}", name) })?
                    .method,
            },
            None => self.stream_method,
        };
        self.decrypt_with(method, id, data)
    }

    fn decrypt_with(&self, method: CryptMethod, id: PlainRef, mut data: Vec<u8>) -> Result<Vec<u8>> {
        match method {
            CryptMethod::Identity => Ok(data),
            CryptMethod::V2 => {
                let key = self.object_key(id, false);
                Rc4::encrypt(&key, &mut data);
                Ok(data)
            }
            CryptMethod::AESV2 => {
                let key = self.object_key(id, true);
                aes128_cbc_decrypt(&key, data)
            }
            CryptMethod::AESV3 => aes256_cbc_decrypt(&self.key, data),
        }
    }

    /// Algorithm 1: the per-object key. `obj_key = MD5(file_key ∥ id₃ ∥
    /// gen₂ ∥ "sAlT"?)` truncated to `min(n + 5, 16)` bytes.
    fn object_key(&self, id: PlainRef, aes: bool) -> Vec<u8> {
        let mut hash = md5::Context::new();
        hash.consume(&self.key);
        hash.consume(&id.id.to_le_bytes()[..3]);
        hash.consume(&id.gen.to_le_bytes()[..2]);
        if aes {
            hash.consume(b"sAlT");
        }
        let digest = hash.compute().0;
        let n = self.key.len();
        digest[..(n + 5).min(16)].to_vec()
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("revision", &self.revision)
            .field("string_method", &self.string_method)
            .field("stream_method", &self.stream_method)
            .finish()
    }
}

fn named_filter_method(dict: &CryptDict, name: &str) -> Result<CryptMethod> {
    if name == "Identity" {
        return Ok(CryptMethod::Identity);
    }
    match dict.crypt_filters.get(name) {
        Some(filter) => Ok(filter.method),
        None => Err(PdfError::NotFound { word: format!("crypt filter {}", name) }),
    }
}

/// If the stream names a `/Crypt` filter of its own, the `/Name` in the
/// matching decode parameters selects the crypt filter (default Identity).
fn stream_crypt_filter_name(info: &Dictionary) -> Result<Option<Name>> {
    let filters: Vec<&Primitive> = match info.get("Filter") {
        Some(p @ Primitive::Name(_)) => vec![p],
        Some(Primitive::Array(items)) => items.iter().collect(),
        _ => return Ok(None),
    };
    let crypt_index = match filters
        .iter()
        .position(|p| matches!(p, Primitive::Name(name) if name == "Crypt"))
    {
        Some(i) => i,
        None => return Ok(None),
    };
    let params = match info.get("DecodeParms") {
        Some(Primitive::Array(items)) => items.get(crypt_index).cloned(),
        Some(p @ Primitive::Dictionary(_)) => Some(p.clone()),
        _ => None,
    };
    let name = match params {
        Some(Primitive::Dictionary(dict)) => match dict.get("Name") {
            Some(p) => p.as_name()?.to_owned(),
            None => "Identity".into(),
        },
        _ => "Identity".into(),
    };
    Ok(Some(name))
}

fn pad_password(pass: &[u8]) -> [u8; 32] {
    let mut padded = [0; 32];
    let n = pass.len().min(32);
    padded[..n].copy_from_slice(&pass[..n]);
    padded[n..].copy_from_slice(&PASSWORD_PADDING[..32 - n]);
    padded
}

/// Algorithm 2: derive the file key from a (candidate user) password.
fn compute_encryption_key(dict: &CryptDict, id: &[u8], pass: &[u8]) -> Result<Vec<u8>> {
    let key_size = dict.key_bytes()?;

    let mut hash = md5::Context::new();
    hash.consume(pad_password(pass));
    hash.consume(&dict.o);
    hash.consume(dict.p.to_le_bytes());
    hash.consume(id);
    if dict.r >= 4 && !dict.encrypt_metadata {
        hash.consume([0xff, 0xff, 0xff, 0xff]);
    }
    let mut digest = hash.compute().0;

    if dict.r >= 3 {
        for _ in 0..50 {
            digest = md5::compute(&digest[..key_size]).0;
        }
    }
    Ok(digest[..key_size].to_vec())
}

/// Algorithm 4 (R2) / Algorithm 5 (R3+): the value of `/U` for a key.
fn compute_u(dict: &CryptDict, id: &[u8], key: &[u8]) -> Vec<u8> {
    if dict.r == 2 {
        let mut data = PASSWORD_PADDING.to_vec();
        Rc4::encrypt(key, &mut data);
        data
    } else {
        let mut hash = md5::Context::new();
        hash.consume(PASSWORD_PADDING);
        hash.consume(id);
        let mut data = hash.compute().0;
        Rc4::encrypt(key, &mut data);
        for i in 1u8..=19 {
            let pass_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            Rc4::encrypt(&pass_key, &mut data);
        }
        data.to_vec()
    }
}

/// Algorithm 6: derive the key and accept it if it reproduces `/U`.
fn authenticate_user_password(dict: &CryptDict, id: &[u8], pass: &[u8]) -> Result<Option<Vec<u8>>> {
    let key = compute_encryption_key(dict, id, pass)?;
    let computed = compute_u(dict, id, &key);
    let correct = if dict.r >= 3 {
        dict.u.len() >= 16 && computed[..16] == dict.u[..16]
    } else {
        computed == dict.u
    };
    Ok(if correct { Some(key) } else { None })
}

/// Algorithm 7: decrypt `/O` with the owner key, treat the result as the
/// user password and authenticate that.
fn authenticate_owner_password(dict: &CryptDict, id: &[u8], pass: &[u8]) -> Result<Option<Vec<u8>>> {
    let key_size = dict.key_bytes()?;

    let mut digest = md5::compute(pad_password(pass)).0;
    if dict.r >= 3 {
        for _ in 0..50 {
            digest = md5::compute(digest).0;
        }
    }
    let owner_key = &digest[..key_size];

    let mut decrypted = dict.o.clone();
    if dict.r == 2 {
        Rc4::encrypt(owner_key, &mut decrypted);
    } else {
        for i in (0u8..20).rev() {
            let pass_key: Vec<u8> = owner_key.iter().map(|b| b ^ i).collect();
            Rc4::encrypt(&pass_key, &mut decrypted);
        }
    }
    authenticate_user_password(dict, id, &decrypted)
}

/// Algorithm 2.A: SASLprep the password, check it against `/O` then `/U`,
/// and unwrap the file key from `/OE` or `/UE`.
fn derive_key_r6(dict: &CryptDict, password: &str) -> Result<Vec<u8>> {
    let prepped = stringprep::saslprep(password)
        .map_err(|_| PdfError::Other { msg: "prohibited character in password".into() })?;
    let mut pass = prepped.as_bytes().to_vec();
    pass.truncate(127);

    let o = &dict.o;
    let u = &dict.u;
    if o.len() < 48 || u.len() < 48 {
        err!(PdfError::DecryptionFailure);
    }

    let owner_hash = sha256_concat(&[&pass, &o[32..40], u]);
    if owner_hash[..] == o[..32] {
        let intermediate = sha256_concat(&[&pass, &o[40..48], u]);
        let oe = dict.oe.as_deref().ok_or(PdfError::MissingEntry {
            typ: "Encrypt",
            field: "OE".into(),
        })?;
        return aes256_cbc_decrypt_no_padding(&intermediate, oe);
    }

    let user_hash = sha256_concat(&[&pass, &u[32..40]]);
    if user_hash[..] == u[..32] {
        let intermediate = sha256_concat(&[&pass, &u[40..48]]);
        let ue = dict.ue.as_deref().ok_or(PdfError::MissingEntry {
            typ: "Encrypt",
            field: "UE".into(),
        })?;
        return aes256_cbc_decrypt_no_padding(&intermediate, ue);
    }

    Err(PdfError::InvalidPassword)
}

fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hash = Sha256::new();
    for part in parts {
        hash.update(part);
    }
    hash.finalize().into()
}

/// AES-128-CBC with the IV prepended to the ciphertext and PKCS#7 padding.
fn aes128_cbc_decrypt(key: &[u8], mut data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() < 16 || data.len() % 16 != 0 {
        err!(PdfError::DecryptionFailure);
    }
    let (iv, ciphertext) = data.split_at_mut(16);
    let plaintext = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| PdfError::DecryptionFailure)?
        .decrypt_padded_mut::<Pkcs7>(ciphertext)
        .map_err(|_| PdfError::DecryptionFailure)?;
    Ok(plaintext.to_vec())
}

/// AES-256-CBC with the IV prepended to the ciphertext and PKCS#7 padding.
fn aes256_cbc_decrypt(key: &[u8], mut data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() < 16 || data.len() % 16 != 0 {
        err!(PdfError::DecryptionFailure);
    }
    let (iv, ciphertext) = data.split_at_mut(16);
    let plaintext = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| PdfError::DecryptionFailure)?
        .decrypt_padded_mut::<Pkcs7>(ciphertext)
        .map_err(|_| PdfError::DecryptionFailure)?;
    Ok(plaintext.to_vec())
}

/// The key-unwrapping variant: zero IV, no padding.
fn aes256_cbc_decrypt_no_padding(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % 16 != 0 {
        err!(PdfError::DecryptionFailure);
    }
    let mut buf = data.to_vec();
    let plaintext = Aes256CbcDec::new_from_slices(key, &[0u8; 16])
        .map_err(|_| PdfError::DecryptionFailure)?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| PdfError::DecryptionFailure)?;
    Ok(plaintext.to_vec())
}
