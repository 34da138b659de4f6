/// Generator polynomial x^8 + x^4 + x^3 + x^2 + 1, top bit implied.
pub const CRC8_POLY: u8 = 0x1D;

/// CRC-8 over `bytes`: MSB first, zero initial register, no reflection and
/// no final xor.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_zero() {
        assert_eq!(crc8(&[]), 0);
        assert_eq!(crc8(&[0, 0, 0]), 0);
    }

    #[test]
    fn test_known_payloads() {
        // Hub WHOISHERE broadcast from address 1, serial 1, name "HUB01".
        let whoishere = [0x01, 0xFF, 0x7F, 0x01, 0x01, 0x01, 0x05, b'H', b'U', b'B', b'0', b'1'];
        assert_eq!(crc8(&whoishere), 0xE1);

        // Switch GETSTATUS from the hub to address 3, serial 9.
        assert_eq!(crc8(&[0x01, 0x03, 0x09, 0x03, 0x03]), 0xA0);

        // "123456789" check value for CRC-8/SAE-J1850 without init/xorout.
        assert_eq!(crc8(b"123456789"), 0x37);
    }

    #[test]
    fn test_detects_single_and_double_bit_flips() {
        let data: Vec<u8> = (0u8..24).map(|i| i.wrapping_mul(37).wrapping_add(11)).collect();
        let reference = crc8(&data);
        let bits = data.len() * 8;

        for i in 0..bits {
            let mut flipped = data.clone();
            flipped[i / 8] ^= 0x80 >> (i % 8);
            assert_ne!(crc8(&flipped), reference, "single flip at bit {i}");

            for j in (i + 1)..bits {
                let mut twice = flipped.clone();
                twice[j / 8] ^= 0x80 >> (j % 8);
                assert_ne!(crc8(&twice), reference, "flips at bits {i} and {j}");
            }
        }
    }
}
