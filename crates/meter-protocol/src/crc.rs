//! CRC-16 variants used by SML meters
//!
//! Both use the reflected CCITT polynomial; they differ in init and final XOR.

/// Reflected form of polynomial 0x1021
const POLY_REFLECTED: u16 = 0x8408;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ byte as u16) & 0xFF) as usize];
    }
    crc
}

/// CRC-16/X-25 (init 0xFFFF, xorout 0xFFFF)
pub fn crc16_x25(data: &[u8]) -> u16 {
    update(0xFFFF, data) ^ 0xFFFF
}

/// CRC-16/KERMIT (init 0x0000, no final XOR)
pub fn crc16_kermit(data: &[u8]) -> u16 {
    update(0x0000, data)
}
