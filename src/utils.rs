pub fn read_unsigned_short(data: &[u8], offset: usize) -> u16 {
    let v0 = data[offset] as u16;
    let v1 = data[offset + 1] as u16;
    v0 + (v1 << 8)
}

pub fn read_signed_short(data: &[u8], offset: usize) -> i16 {
    read_unsigned_short(data, offset) as i16
}

/// 20-bit ADC value stored as msb, lsb, xlsb (upper nibble).
pub fn read_adc20(data: &[u8], offset: usize) -> u32 {
    let v0 = data[offset] as u32;
    let v1 = data[offset + 1] as u32;
    let v2 = data[offset + 2] as u32;
    (v0 << 12) + (v1 << 4) + (v2 >> 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorts_are_little_endian() {
        let data = [0x70, 0x6B, 0x18, 0xFC];
        assert_eq!(read_unsigned_short(&data, 0), 27504);
        assert_eq!(read_signed_short(&data, 2), -1000);
    }

    #[test]
    fn adc_drops_low_nibble_of_xlsb() {
        assert_eq!(read_adc20(&[0x7E, 0xED, 0x0F], 0), 0x7EED0);
    }
}
