/// Holds back the tail of a byte chunk that ends inside a multi-byte
/// character, so a read boundary never turns one character into two
/// replacement marks. Bytes that can never decode are replaced at once.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(err) if err.error_len().is_none() => {
                let rest = self.pending.split_off(err.valid_up_to());
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = rest;
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_character_waits_for_its_tail() {
        let mut carry = Utf8Carry::default();
        let bytes = "a→b".as_bytes();
        assert_eq!(carry.push(&bytes[..2]), "a");
        assert!(!carry.is_empty());
        assert_eq!(carry.push(&bytes[2..]), "→b");
        assert!(carry.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced_not_held() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&[0xff, b'x']), "\u{fffd}x");
        assert!(carry.is_empty());
    }

    #[test]
    fn four_byte_character_split_three_ways() {
        let mut carry = Utf8Carry::default();
        let bytes = "🦀".as_bytes();
        assert_eq!(carry.push(&bytes[..1]), "");
        assert_eq!(carry.push(&bytes[1..3]), "");
        assert_eq!(carry.push(&bytes[3..]), "🦀");
    }
}
