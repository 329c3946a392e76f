//! Gram wire codec: framing, header fields, fragmentation.
//!
//! Every gram of one memo opens with a fixed-width header whose fields are
//! base64url text: a two-character code, a 22-character memo identifier
//! (keyed on the wire together with the code), an optional verifier
//! identifier, and a four-character fragment number. The first gram
//! (number 0) additionally carries the total gram count, and signed grams
//! close with an opaque signature tail. In *curt* mode the header and tail
//! travel base64-decoded as raw bytes; every field width is a multiple of
//! four characters, so the packed form is byte aligned by construction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::MemoError;

/// Absolute maximum memo payload size in bytes.
pub const MAX_MEMO_SIZE: usize = (1 << 32) - 1;

/// Absolute maximum gram size in bytes.
pub const MAX_GRAM_SIZE: usize = (1 << 16) - 1;

/// Absolute maximum gram count per memo.
pub const MAX_GRAM_COUNT: usize = (1 << 24) - 1;

/// The base64url alphabet indexed by sextet value.
const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Gram type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GramDex {
    /// Unsigned framing, code `"__"`.
    Basic,
    /// Signed framing with verifier id and signature tail, code `"_-"`.
    Signed,
}

impl GramDex {
    /// The two-character wire code.
    pub fn code(self) -> &'static str {
        match self {
            GramDex::Basic => "__",
            GramDex::Signed => "_-",
        }
    }

    /// Resolves a wire code back to its dex.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "__" => Some(GramDex::Basic),
            "_-" => Some(GramDex::Signed),
            _ => None,
        }
    }

    /// The field widths for this code.
    pub fn sizage(self) -> Sizage {
        match self {
            GramDex::Basic => Sizage { cs: 2, ms: 22, vs: 0, ss: 0, ns: 4, hs: 28 },
            GramDex::Signed => Sizage { cs: 2, ms: 22, vs: 44, ss: 88, ns: 4, hs: 160 },
        }
    }
}

/// Field widths of one gram header, in base64 characters.
///
/// `hs = cs + ms + vs + ss + ns` is the per-gram overhead; the count field
/// (the "neck", another `ns` characters) is carried by gram 0 only and is on
/// top of `hs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sizage {
    /// Code size.
    pub cs: usize,
    /// Memo identifier size.
    pub ms: usize,
    /// Verifier identifier size.
    pub vs: usize,
    /// Signature size.
    pub ss: usize,
    /// Number (and count) size.
    pub ns: usize,
    /// Total per-gram overhead.
    pub hs: usize,
}

/// True when a gram travels in curt (raw base2) form.
///
/// The codes all begin with `_` or `-`, whose sextets have their high bits
/// set, so the first byte of a packed header is >= 0xF0; base64 text is
/// plain ASCII.
pub fn wiff(gram: &[u8]) -> bool {
    gram.first().is_some_and(|b| b & 0x80 != 0)
}

/// Encodes `n` as fixed-width big-endian base64 digits.
pub fn int_to_b64(mut n: u64, len: usize) -> String {
    let mut out = vec![b'A'; len];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(n & 0x3F) as usize];
        n >>= 6;
    }
    out.iter().map(|&b| b as char).collect()
}

fn b64_index(c: u8) -> Option<u64> {
    match c {
        b'A'..=b'Z' => Some((c - b'A') as u64),
        b'a'..=b'z' => Some((c - b'a') as u64 + 26),
        b'0'..=b'9' => Some((c - b'0') as u64 + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// Decodes fixed-width big-endian base64 digits.
pub fn b64_to_int(text: &str) -> Result<u64, MemoError> {
    text.bytes().try_fold(0u64, |acc, c| {
        b64_index(c)
            .map(|v| (acc << 6) | v)
            .ok_or(MemoError::Malformed("non-base64 digit"))
    })
}

/// Reads the leading `count` sextets of packed data back as base64 text.
pub fn code_b2_to_b64(data: &[u8], count: usize) -> Result<String, MemoError> {
    if data.len() * 8 < count * 6 {
        return Err(MemoError::Malformed("short base2 code"));
    }
    let mut out = String::with_capacity(count);
    for i in 0..count {
        let bit = i * 6;
        let byte = bit / 8;
        let next = if byte + 1 < data.len() { data[byte + 1] } else { 0 };
        let window = ((data[byte] as u16) << 8) | next as u16;
        let sextet = (window >> (10 - (bit % 8))) & 0x3F;
        out.push(ALPHABET[sextet as usize] as char);
    }
    Ok(out)
}

fn field<'a>(data: &'a [u8], at: usize, len: usize) -> Result<&'a str, MemoError> {
    let bytes = data
        .get(at..at + len)
        .ok_or(MemoError::Malformed("short gram"))?;
    if !bytes.iter().all(|&b| b64_index(b).is_some()) {
        return Err(MemoError::Malformed("non-base64 header field"));
    }
    // All base64 characters are single-byte ASCII.
    std::str::from_utf8(bytes).map_err(|_| MemoError::Malformed("non-base64 header field"))
}

/// One parsed wire fragment of a memo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gram {
    /// The framing code.
    pub code: GramDex,
    /// Canonical reassembly key: code plus memo identifier, 24 base64 chars.
    pub key: String,
    /// Verifier identifier, signed framing only.
    pub vid: Option<String>,
    /// Fragment number within the memo.
    pub num: u32,
    /// Declared total gram count; gram 0 only.
    pub cnt: Option<u32>,
    /// The payload fragment.
    pub payload: Vec<u8>,
    /// Opaque signature tail, signed framing only.
    pub sig: Option<String>,
}

impl Gram {
    /// Parses one datagram in either wire form.
    pub fn parse(data: &[u8]) -> Result<Self, MemoError> {
        if wiff(data) {
            Self::parse_curt(data)
        } else {
            Self::parse_b64(data)
        }
    }

    fn parse_b64(data: &[u8]) -> Result<Self, MemoError> {
        let code_txt = field(data, 0, 2)?;
        let code = GramDex::from_code(code_txt).ok_or(MemoError::Malformed("unknown code"))?;
        let z = code.sizage();

        let key = field(data, 0, z.cs + z.ms)?.to_string();
        let mut at = z.cs + z.ms;
        let vid = if z.vs > 0 {
            let vid = field(data, at, z.vs)?.to_string();
            at += z.vs;
            Some(vid)
        } else {
            None
        };
        let num = b64_to_int(field(data, at, z.ns)?)? as u32;
        at += z.ns;
        let cnt = if num == 0 {
            let cnt = b64_to_int(field(data, at, z.ns)?)? as u32;
            at += z.ns;
            if cnt == 0 {
                return Err(MemoError::Malformed("zero gram count"));
            }
            Some(cnt)
        } else {
            None
        };

        let body = data.get(at..).ok_or(MemoError::Malformed("short gram"))?;
        let (payload, sig) = if z.ss > 0 {
            if body.len() < z.ss {
                return Err(MemoError::Malformed("short gram"));
            }
            let split = body.len() - z.ss;
            let sig = field(data, at + split, z.ss)?.to_string();
            (body[..split].to_vec(), Some(sig))
        } else {
            (body.to_vec(), None)
        };

        Ok(Gram { code, key, vid, num, cnt, payload, sig })
    }

    fn parse_curt(data: &[u8]) -> Result<Self, MemoError> {
        let code_txt = code_b2_to_b64(data, 2)?;
        let code =
            GramDex::from_code(&code_txt).ok_or(MemoError::Malformed("unknown code"))?;
        let z = code.sizage();

        let head = (z.cs + z.ms + z.vs + z.ns) * 3 / 4;
        if data.len() < head {
            return Err(MemoError::Malformed("short gram"));
        }
        let text = URL_SAFE_NO_PAD.encode(&data[..head]);
        let text = text.as_bytes();

        let key = field(text, 0, z.cs + z.ms)?.to_string();
        let mut at = z.cs + z.ms;
        let vid = if z.vs > 0 {
            let vid = field(text, at, z.vs)?.to_string();
            at += z.vs;
            Some(vid)
        } else {
            None
        };
        let num = b64_to_int(field(text, at, z.ns)?)? as u32;

        let mut off = head;
        let cnt = if num == 0 {
            let neck = z.ns * 3 / 4;
            let bytes = data
                .get(off..off + neck)
                .ok_or(MemoError::Malformed("short gram"))?;
            off += neck;
            let cnt = b64_to_int(&URL_SAFE_NO_PAD.encode(bytes))? as u32;
            if cnt == 0 {
                return Err(MemoError::Malformed("zero gram count"));
            }
            Some(cnt)
        } else {
            None
        };

        let body = data.get(off..).ok_or(MemoError::Malformed("short gram"))?;
        let (payload, sig) = if z.ss > 0 {
            let sigb = z.ss * 3 / 4;
            if body.len() < sigb {
                return Err(MemoError::Malformed("short gram"));
            }
            let split = body.len() - sigb;
            let sig = URL_SAFE_NO_PAD.encode(&body[split..]);
            (body[..split].to_vec(), Some(sig))
        } else {
            (body.to_vec(), None)
        };

        Ok(Gram { code, key, vid, num, cnt, payload, sig })
    }
}

/// Splits a memo payload into framed grams bounded by `size` bytes each.
///
/// `mid` is the 22-character memo identifier shared by every gram; `vid` and
/// `sig` are required exactly when the code is [`GramDex::Signed`]. The
/// first gram carries the count field, so its payload capacity is one neck
/// smaller than the rest.
pub fn fragment(
    code: GramDex,
    mid: &str,
    vid: Option<&str>,
    memo: &[u8],
    size: usize,
    curt: bool,
    sig: Option<&str>,
) -> Result<Vec<Vec<u8>>, MemoError> {
    let z = code.sizage();
    if memo.len() > MAX_MEMO_SIZE {
        return Err(MemoError::OversizeMemo { got: memo.len(), max: MAX_MEMO_SIZE });
    }
    if mid.len() != z.ms {
        return Err(MemoError::Malformed("mid width"));
    }
    if (z.vs > 0) != vid.is_some() || vid.is_some_and(|v| v.len() != z.vs) {
        return Err(MemoError::MissingVid);
    }
    if (z.ss > 0) != sig.is_some() || sig.is_some_and(|s| s.len() != z.ss) {
        return Err(MemoError::Malformed("signature width"));
    }

    // Per-gram payload capacity; the head and tail shrink by 3/4 when packed.
    let (heads, tail) = if curt {
        (((z.hs - z.ss) * 3 / 4, (z.hs - z.ss + z.ns) * 3 / 4), z.ss * 3 / 4)
    } else {
        ((z.hs - z.ss, z.hs - z.ss + z.ns), z.ss)
    };
    let capn = size
        .checked_sub(heads.0 + tail)
        .filter(|&cap| cap > 0)
        .ok_or(MemoError::Malformed("gram size below overhead"))?;
    let cap0 = size
        .checked_sub(heads.1 + tail)
        .filter(|&cap| cap > 0)
        .ok_or(MemoError::Malformed("gram size below overhead"))?;

    let cnt = if memo.len() <= cap0 {
        1
    } else {
        1 + (memo.len() - cap0).div_ceil(capn)
    };
    if cnt > MAX_GRAM_COUNT {
        return Err(MemoError::CountOverflow { got: cnt, max: MAX_GRAM_COUNT });
    }

    let mut grams = Vec::with_capacity(cnt);
    let mut off = 0;
    for num in 0..cnt {
        let cap = if num == 0 { cap0 } else { capn };
        let take = cap.min(memo.len() - off);
        let chunk = &memo[off..off + take];
        off += take;

        let mut head = String::with_capacity(z.hs - z.ss + z.ns);
        head.push_str(code.code());
        head.push_str(mid);
        if let Some(vid) = vid {
            head.push_str(vid);
        }
        head.push_str(&int_to_b64(num as u64, z.ns));
        if num == 0 {
            head.push_str(&int_to_b64(cnt as u64, z.ns));
        }

        let mut gram = if curt {
            URL_SAFE_NO_PAD
                .decode(head.as_bytes())
                .map_err(|_| MemoError::Malformed("unpackable header"))?
        } else {
            head.into_bytes()
        };
        gram.extend_from_slice(chunk);
        if let Some(sig) = sig {
            if curt {
                let tail = URL_SAFE_NO_PAD
                    .decode(sig.as_bytes())
                    .map_err(|_| MemoError::Malformed("unpackable signature"))?;
                gram.extend_from_slice(&tail);
            } else {
                gram.extend_from_slice(sig.as_bytes());
            }
        }
        grams.push(gram);
    }
    Ok(grams)
}
