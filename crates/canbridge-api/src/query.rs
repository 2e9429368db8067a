//! Lenient query string decoding
//!
//! Browsers submitting the configuration form produce
//! `application/x-www-form-urlencoded` queries, but hand-typed URLs are
//! often malformed. Decoding never fails: stray `%` signs pass through and
//! invalid UTF-8 is replaced.

/// Decoded query parameters in first-occurrence order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Insert or overwrite; an overwritten key keeps its position
    fn insert(&mut self, key: String, value: String) {
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.pairs.push((key, value)),
        }
    }
}

/// Decode a raw query string (without the leading `?`)
///
/// Pairs without `=` are skipped. Keys and values split on the first `=`
/// and are decoded with [`percent_decode`]. For duplicate keys the last
/// value wins.
pub fn decode_query_string(raw: &str) -> QueryParams {
    let mut params = QueryParams::default();
    for pair in raw.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        params.insert(percent_decode(key), percent_decode(value));
    }
    params
}

/// `+` becomes a space and `%XX` the byte 0xXX; a `%` not followed by two
/// hex digits is kept literally
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (bytes.get(i + 1).and_then(hex_value), bytes.get(i + 2).and_then(hex_value)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: &u8) -> Option<u8> {
    (*byte as char).to_digit(16).map(|d| d as u8)
}
