use std::io::Cursor;

use murmur3::*;

pub fn hash_code(v: &[u8]) -> std::io::Result<u32> {
    let mut cursor = Cursor::new(v);
    murmur3_32(&mut cursor, 0x01000193)
}

#[cfg(test)]
mod tests {
    use crate::utils::hash::hash_code;

    #[test]
    pub fn hash_code_stable_test() {
        let a = hash_code(b"partition-key").unwrap();
        let b = hash_code(b"partition-key").unwrap();
        assert_eq!(a, b);

        let c = hash_code(b"partition-key2").unwrap();
        assert_ne!(a, c);
    }
}
