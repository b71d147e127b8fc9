use crate::{Error, Result};

pub struct Utils;
impl Utils {
    /// Parses a byte count: decimal, `0x`/`0b`/`0o` prefixed, with an
    /// optional `K`/`M` binary multiplier.
    pub fn str_to_usize(s: &str) -> Result<usize> {
        let s = s.trim();

        let (num_str, multiplier) = match s.chars().last() {
            Some('k') | Some('K') => (&s[..s.len() - 1], 1024usize),
            Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
            _ => (s, 1),
        };

        let unsigned: usize = if let Some(hex) = num_str.strip_prefix("0x") {
            usize::from_str_radix(hex, 16)?
        } else if let Some(bin) = num_str.strip_prefix("0b") {
            usize::from_str_radix(bin, 2)?
        } else if let Some(oct) = num_str.strip_prefix("0o") {
            usize::from_str_radix(oct, 8)?
        } else {
            num_str.parse()?
        };

        unsigned
            .checked_mul(multiplier)
            .ok_or_else(|| Error::invalid_input(format!("{} is out of range", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bases_and_suffixes() {
        assert_eq!(Utils::str_to_usize("256").unwrap(), 256);
        assert_eq!(Utils::str_to_usize("0x100").unwrap(), 256);
        assert_eq!(Utils::str_to_usize("0b1000").unwrap(), 8);
        assert_eq!(Utils::str_to_usize("0o20").unwrap(), 16);
        assert_eq!(Utils::str_to_usize("2k").unwrap(), 2048);
        assert_eq!(Utils::str_to_usize(" 32K ").unwrap(), 32768);
        assert!(Utils::str_to_usize("twelve").is_err());
        assert!(Utils::str_to_usize("").is_err());
    }

    #[test]
    fn multiplier_overflow_is_an_error() {
        let err = Utils::str_to_usize(&format!("{}K", usize::MAX)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(Utils::str_to_usize(&format!("{}M", usize::MAX / 1024)).is_err());
    }
}
