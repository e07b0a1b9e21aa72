use sha2::{Digest as _, Sha256};

pub const ALPHA_NUM: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

pub fn sha256_hex_digest<D: AsRef<[u8]>>(data: D) -> String {
    let mut hasher = Sha256::default();
    hasher.update(data.as_ref());
    let digest = hasher.finalize();
    format!("{digest:x}")
}

/// Generate a pseudorandom string of the given length from the given alphabet.
pub fn pseudorandom_string(alphabet: &str, len: usize) -> String {
    let chars: Vec<char> = alphabet.chars().collect();
    (0..len)
        .map(|_| chars[rand::random_range(0..chars.len())])
        .collect()
}
