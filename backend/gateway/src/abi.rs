//! Minimal Ethereum ABI codec for the DealBlock and ERC20 surfaces.
//!
//! Covers the types those contracts use: `address`, `uintN` (values up to
//! 128 bits), `bool`, `string`, dynamic arrays and tuples. Words follow the
//! standard head/tail layout.
//!
//! Token balances and allowances may legitimately exceed 128 bits (an
//! unlimited approval is `type(uint256).max`); outputs declared as
//! [`ParamType::SaturatingUint`] clamp to `u128::MAX` instead of failing.

use dealblock_lifecycle::{Address, ContractErrorCode};
use sha3::{Digest, Keccak256};

use crate::errors::{GatewayError, Result};

const WORD: usize = 32;

/// Selector of the `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint(usize),
    /// `uintN` read from a third-party contract; values above `u128::MAX`
    /// decode as `u128::MAX`.
    SaturatingUint(usize),
    Bool,
    String,
    /// Dynamic-length `T[]`.
    Array(&'static ParamType),
    Tuple(&'static [ParamType]),
}

impl ParamType {
    pub fn is_dynamic(&self) -> bool {
        match self {
            ParamType::String | ParamType::Array(_) => true,
            ParamType::Tuple(inner) => inner.iter().any(ParamType::is_dynamic),
            _ => false,
        }
    }

    fn head_len(&self) -> usize {
        match self {
            ParamType::Tuple(inner) if !self.is_dynamic() => {
                inner.iter().map(ParamType::head_len).sum()
            }
            _ => WORD,
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            ParamType::Address => "address".to_string(),
            ParamType::Uint(bits) | ParamType::SaturatingUint(bits) => format!("uint{bits}"),
            ParamType::Bool => "bool".to_string(),
            ParamType::String => "string".to_string(),
            ParamType::Array(inner) => format!("{}[]", inner.canonical()),
            ParamType::Tuple(inner) => format!(
                "({})",
                inner
                    .iter()
                    .map(ParamType::canonical)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(u128),
    Bool(bool),
    String(String),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Token::String(_) | Token::Array(_) => true,
            Token::Tuple(inner) => inner.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    fn head_len(&self) -> usize {
        match self {
            Token::Tuple(inner) if !self.is_dynamic() => inner.iter().map(Token::head_len).sum(),
            _ => WORD,
        }
    }

    fn matches(&self, ty: &ParamType) -> bool {
        match (self, ty) {
            (Token::Address(_), ParamType::Address)
            | (Token::Uint(_), ParamType::Uint(_) | ParamType::SaturatingUint(_))
            | (Token::Bool(_), ParamType::Bool)
            | (Token::String(_), ParamType::String) => true,
            (Token::Array(items), ParamType::Array(inner)) => {
                items.iter().all(|item| item.matches(inner))
            }
            (Token::Tuple(items), ParamType::Tuple(inner)) => {
                items.len() == inner.len() && items.iter().zip(inner.iter()).all(|(t, p)| t.matches(p))
            }
            _ => false,
        }
    }

    pub fn into_address(self) -> Result<Address> {
        match self {
            Token::Address(a) => Ok(a),
            other => Err(unexpected("address", &other)),
        }
    }

    pub fn into_uint(self) -> Result<u128> {
        match self {
            Token::Uint(v) => Ok(v),
            other => Err(unexpected("uint", &other)),
        }
    }

    pub fn into_u64(self) -> Result<u64> {
        let value = self.into_uint()?;
        u64::try_from(value).map_err(|_| GatewayError::Abi(format!("{value} does not fit in u64")))
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Token::Bool(b) => Ok(b),
            other => Err(unexpected("bool", &other)),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Token::String(s) => Ok(s),
            other => Err(unexpected("string", &other)),
        }
    }

    pub fn into_array(self) -> Result<Vec<Token>> {
        match self {
            Token::Array(items) => Ok(items),
            other => Err(unexpected("array", &other)),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<Token>> {
        match self {
            Token::Tuple(items) => Ok(items),
            other => Err(unexpected("tuple", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Token) -> GatewayError {
    GatewayError::Abi(format!("expected {expected}, got {got:?}"))
}

/// A contract function with a fixed signature.
#[derive(Clone, Copy, Debug)]
pub struct Function {
    pub name: &'static str,
    pub inputs: &'static [ParamType],
    pub outputs: &'static [ParamType],
}

impl Function {
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.inputs.iter().map(ParamType::canonical).collect();
        format!("{}({})", self.name, args.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        selector(&self.signature())
    }

    /// Selector followed by the encoded arguments.
    pub fn encode_input(&self, args: &[Token]) -> Result<Vec<u8>> {
        if args.len() != self.inputs.len() {
            return Err(GatewayError::Abi(format!(
                "{} takes {} arguments, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }
        if let Some((i, _)) = args
            .iter()
            .zip(self.inputs.iter())
            .enumerate()
            .find(|(_, (arg, ty))| !arg.matches(ty))
        {
            return Err(GatewayError::Abi(format!(
                "argument {i} of {} is not a {}",
                self.name,
                self.inputs[i].canonical()
            )));
        }
        let mut out = self.selector().to_vec();
        out.extend(encode(args));
        Ok(out)
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>> {
        decode(self.outputs, data)
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

// ─────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────

pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_len).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            tail.extend(encode_single(token));
        } else {
            head.extend(encode_single(token));
        }
    }
    head.extend(tail);
    head
}

fn encode_single(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(address) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(address.as_bytes());
            word.to_vec()
        }
        Token::Uint(value) => uint_word(*value).to_vec(),
        Token::Bool(b) => uint_word(u128::from(*b)).to_vec(),
        Token::String(s) => {
            let bytes = s.as_bytes();
            let mut out = uint_word(bytes.len() as u128).to_vec();
            out.extend_from_slice(bytes);
            out.resize(WORD + padded_len(bytes.len()), 0);
            out
        }
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            out
        }
        Token::Tuple(items) => encode(items),
    }
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

// ─────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────

pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    decode_tuple(types, data, 0)
}

fn decode_tuple(types: &[ParamType], data: &[u8], base: usize) -> Result<Vec<Token>> {
    let mut offset = base;
    let mut out = Vec::with_capacity(types.len());
    for ty in types {
        if ty.is_dynamic() {
            let relative = read_usize(data, offset)?;
            let start = base
                .checked_add(relative)
                .ok_or_else(|| GatewayError::Abi("offset overflow".to_string()))?;
            out.push(decode_single(ty, data, start)?);
            offset += WORD;
        } else {
            out.push(decode_single(ty, data, offset)?);
            offset += ty.head_len();
        }
    }
    Ok(out)
}

fn decode_single(ty: &ParamType, data: &[u8], at: usize) -> Result<Token> {
    match ty {
        ParamType::Address => {
            let word = read_word(data, at)?;
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&word[12..]);
            Ok(Token::Address(Address::from_bytes(bytes)))
        }
        ParamType::Uint(_) => Ok(Token::Uint(read_uint(data, at)?)),
        ParamType::SaturatingUint(_) => Ok(Token::Uint(read_uint_saturating(data, at)?)),
        ParamType::Bool => Ok(Token::Bool(read_uint(data, at)? != 0)),
        ParamType::String => {
            let len = read_usize(data, at)?;
            let bytes = slice(data, at + WORD, len)?;
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|e| GatewayError::Abi(format!("invalid utf-8 string: {e}")))?;
            Ok(Token::String(s))
        }
        ParamType::Array(inner) => {
            let len = read_usize(data, at)?;
            if len > data.len() / WORD {
                return Err(GatewayError::Abi(format!("array length {len} out of range")));
            }
            let types = vec![**inner; len];
            Ok(Token::Array(decode_tuple(&types, data, at + WORD)?))
        }
        ParamType::Tuple(inner) => Ok(Token::Tuple(decode_tuple(inner, data, at)?)),
    }
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| GatewayError::Abi(format!("data too short: need {len} bytes at {at}")))
}

fn read_word(data: &[u8], at: usize) -> Result<&[u8]> {
    slice(data, at, WORD)
}

fn read_uint(data: &[u8], at: usize) -> Result<u128> {
    let word = read_word(data, at)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(GatewayError::Abi(format!("uint at {at} exceeds 128 bits")));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(bytes))
}

fn read_uint_saturating(data: &[u8], at: usize) -> Result<u128> {
    let word = read_word(data, at)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Ok(u128::MAX);
    }
    read_uint(data, at)
}

fn read_usize(data: &[u8], at: usize) -> Result<usize> {
    let value = read_uint(data, at)?;
    usize::try_from(value).map_err(|_| GatewayError::Abi(format!("length {value} out of range")))
}

// ─────────────────────────────────────────────────────────
// Hex and revert payloads
// ─────────────────────────────────────────────────────────

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex(raw: &str) -> Result<Vec<u8>> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| GatewayError::Abi(format!("invalid hex {raw:?}: {e}")))
}

/// Reason carried by revert data: the `Error(string)` message, or the name
/// of a known custom error such as `NOT_PAYEE()`.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    let (sel, body) = data.split_first_chunk::<4>()?;
    if *sel == ERROR_STRING_SELECTOR {
        return decode(&[ParamType::String], body)
            .ok()?
            .pop()?
            .into_string()
            .ok();
    }
    ContractErrorCode::ALL
        .into_iter()
        .find(|code| selector(&format!("{}()", code.name())) == *sel)
        .map(|code| code.name().to_string())
}
