use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::str::FromStr;

use fnv::FnvHasher;
use seahash::SeaHasher;
use sha1::{Digest, Sha1};
use siphasher::sip::SipHasher;

/// 64-bit hash functions available for hashing shingles.
///
/// `ShingleHasher` is a `BuildHasher`, so it can be plugged into
/// [`ShingleSketcher::new_with_hasher`](crate::sketch::ShingleSketcher::new_with_hasher).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShingleHasher {
    Sip,
    Sha1,
    Sea,
    #[default]
    Fnv,
}

impl ShingleHasher {
    pub fn new_hasher(&self) -> Box<dyn Hasher> {
        match self {
            ShingleHasher::Sip => Box::new(SipHasher::new_with_keys(1, 2)),
            ShingleHasher::Sha1 => Box::new(Sha1Hasher::new()),
            ShingleHasher::Sea => Box::new(SeaHasher::new()),
            ShingleHasher::Fnv => Box::new(FnvHasher::default()),
        }
    }
}

impl BuildHasher for ShingleHasher {
    type Hasher = Box<dyn Hasher>;

    fn build_hasher(&self) -> Self::Hasher {
        self.new_hasher()
    }
}

impl FromStr for ShingleHasher {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "sip" => Ok(ShingleHasher::Sip),
            "sha1" => Ok(ShingleHasher::Sha1),
            "sea" => Ok(ShingleHasher::Sea),
            "fnv" => Ok(ShingleHasher::Fnv),
            _ => Err(format!(
                "Unsupported hasher [{}]. Supported hashers [sip, sha1, sea, fnv].",
                input
            )),
        }
    }
}

impl fmt::Display for ShingleHasher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Buffers the written bytes and reduces their SHA-1 digest to the first
/// 8 bytes, read big-endian.
#[derive(Default)]
pub struct Sha1Hasher {
    bytes: Vec<u8>,
}

impl Sha1Hasher {
    pub fn new() -> Self {
        Sha1Hasher { bytes: Vec::new() }
    }
}

impl Hasher for Sha1Hasher {
    fn finish(&self) -> u64 {
        let digest = Sha1::digest(self.bytes.as_slice());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::ShingleHasher;
    use std::hash::BuildHasher;

    #[test]
    fn test_parse_hasher() {
        assert_eq!("SIP".parse::<ShingleHasher>(), Ok(ShingleHasher::Sip));
        assert_eq!("sha1".parse::<ShingleHasher>(), Ok(ShingleHasher::Sha1));
        assert_eq!("sea".parse::<ShingleHasher>(), Ok(ShingleHasher::Sea));
        assert_eq!("fnv".parse::<ShingleHasher>(), Ok(ShingleHasher::Fnv));
        assert!("md5".parse::<ShingleHasher>().is_err());
    }

    #[test]
    fn test_hashers_are_deterministic() {
        for hasher in [ShingleHasher::Sip, ShingleHasher::Sha1, ShingleHasher::Sea, ShingleHasher::Fnv] {
            let first = hasher.hash_one("near duplicate");
            let second = hasher.hash_one("near duplicate");
            let other = hasher.hash_one("something else");
            assert_eq!(first, second, "{}", hasher);
            assert_ne!(first, other, "{}", hasher);
        }
    }
}
